//! Command batch parsing.
//!
//! A frame payload carries one or more commands:
//! ```text
//! Batch   = Command (";" Command)*
//! Command = Action ("," Param)*
//! ```
//! Actions are case-insensitive and stored lower-cased.

/// Separator between commands in a batch.
pub const COMMAND_SEPARATOR: char = ';';

/// Separator between fields of a command.
pub const FIELD_SEPARATOR: char = ',';

/// A parsed unit of dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    action: String,
    params: Vec<String>,
}

impl Command {
    /// Create a command; the action is lower-cased.
    pub fn new(action: &str, params: Vec<String>) -> Self {
        Self {
            action: action.to_lowercase(),
            params,
        }
    }

    /// Parse a single command segment.
    ///
    /// Returns `None` for blank segments or segments without an action.
    pub fn parse(segment: &str) -> Option<Self> {
        let segment = segment.trim();
        if segment.is_empty() {
            return None;
        }

        let mut fields = segment.split(FIELD_SEPARATOR).map(str::trim);
        let action = fields.next().filter(|a| !a.is_empty())?;
        let params = fields.map(str::to_string).collect();

        Some(Self::new(action, params))
    }

    /// Lower-cased action name.
    #[inline]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Ordered parameters.
    #[inline]
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

/// Split a payload into its commands, preserving order.
///
/// # Example
///
/// ```
/// use tickwire::protocol::parse_batch;
///
/// let batch = parse_batch("READY;load_item,3,7");
/// assert_eq!(batch[0].action(), "ready");
/// assert_eq!(batch[1].params(), ["3", "7"]);
/// ```
pub fn parse_batch(text: &str) -> Vec<Command> {
    text.split(COMMAND_SEPARATOR)
        .filter_map(|segment| {
            let command = Command::parse(segment);
            if command.is_none() && !segment.trim().is_empty() {
                tracing::debug!(segment, "skipping command without action");
            }
            command
        })
        .collect()
}

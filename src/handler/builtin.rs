//! Built-in actions.
//!
//! | action            | response                                   |
//! |-------------------|--------------------------------------------|
//! | `ready`           | configured ready reply; poll every tick    |
//! | `path`            | module path                                |
//! | `plugins`         | `index,name,uri` entries joined by `\|`    |
//! | `load_item,<i>..` | `success`, or a failure naming bad indices |

use super::{Dispatcher, HandlerResult, RequestContext};

/// Separator between `plugins` entries.
pub const ITEM_SEPARATOR: &str = "|";

/// Register all built-in actions.
pub fn register_builtins(dispatcher: &mut Dispatcher) {
    dispatcher.register("ready", ready);
    dispatcher.register("path", path);
    dispatcher.register("plugins", plugins);
    dispatcher.register("load_item", load_item);
}

/// The controller is ready: poll faster and acknowledge.
fn ready(ctx: &mut RequestContext<'_>, _params: &[String]) -> HandlerResult {
    tracing::info!("controller ready, increasing poll frequency");
    let session = ctx.session();
    let interval = session.ready_poll_interval();
    session.set_poll_interval(interval);

    let reply = session.ready_reply().to_string();
    ctx.respond(reply);
    Ok(())
}

fn path(ctx: &mut RequestContext<'_>, _params: &[String]) -> HandlerResult {
    let path = ctx.module_path().display().to_string();
    ctx.respond(path);
    Ok(())
}

fn plugins(ctx: &mut RequestContext<'_>, _params: &[String]) -> HandlerResult {
    let entries: Vec<String> = ctx
        .catalog()
        .items()
        .iter()
        .map(|item| item.wire_entry())
        .collect();

    ctx.respond(entries.join(ITEM_SEPARATOR));
    Ok(())
}

/// Load each listed index. Bad or failing indices do not stop the rest.
fn load_item(ctx: &mut RequestContext<'_>, params: &[String]) -> HandlerResult {
    tracing::info!(items = %params.join(", "), "loading items");

    let mut failed = Vec::new();
    for param in params {
        let result = param
            .parse::<usize>()
            .map_err(|e| e.to_string())
            .and_then(|index| ctx.catalog().load_by_index(index).map_err(|e| e.to_string()));

        if let Err(e) = result {
            tracing::error!(item = %param, "failed to load item: {}", e);
            failed.push(param.as_str());
        }
    }

    if failed.is_empty() {
        ctx.respond("success");
    } else {
        ctx.fail(&format!("failed to load {}", failed.join(",")));
    }
    Ok(())
}

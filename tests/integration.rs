//! Integration tests for tickwire.
//!
//! A blocking TCP listener plays the controller; the test thread plays the
//! host and ticks the bridge while it waits for frames.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tickwire::handler::RequestContext;
use tickwire::protocol::{
    encode_frame, Frame, FrameBuffer, RequestId, READY_PAYLOAD, SHUTDOWN_PAYLOAD,
};
use tickwire::{Bridge, BridgeBuilder, BridgeConfig, CatalogNode, ConnectionState, Endpoint, StaticCatalog};

const DEADLINE: Duration = Duration::from_secs(10);

/// The controller end of one connection.
struct Controller {
    stream: TcpStream,
    frames: FrameBuffer,
    pending: VecDeque<Frame>,
}

impl Controller {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();
        Self {
            stream,
            frames: FrameBuffer::new(),
            pending: VecDeque::new(),
        }
    }

    fn send(&mut self, id: u64, text: &str) {
        let bytes = encode_frame(RequestId::new(id).unwrap(), text.as_bytes()).unwrap();
        self.stream.write_all(&bytes).unwrap();
    }

    /// Read one byte chunk; `None` on timeout, `Some(0)` on EOF.
    fn read_some(&mut self) -> Option<usize> {
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(n) => {
                self.pending.extend(self.frames.push(&buf[..n]));
                Some(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                None
            }
            Err(e) => panic!("controller read failed: {e}"),
        }
    }

    /// Tick the bridge until a frame arrives.
    fn recv(&mut self, bridge: &mut Bridge) -> Frame {
        let deadline = Instant::now() + DEADLINE;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return frame;
            }
            assert!(Instant::now() < deadline, "no frame from the bridge");
            bridge.tick();
            if self.read_some() == Some(0) {
                panic!("bridge closed the connection");
            }
        }
    }

    fn recv_text(&mut self, bridge: &mut Bridge) -> (u32, String) {
        let frame = self.recv(bridge);
        let text = frame.text().unwrap().to_string();
        (frame.request_id().value(), text)
    }

    fn expect_ready(&mut self, bridge: &mut Bridge) {
        let frame = self.recv(bridge);
        assert_eq!(frame.request_id(), RequestId::ANNOUNCE);
        assert_eq!(frame.payload(), READY_PAYLOAD);
    }

    /// Read until EOF and return every frame received.
    fn read_to_eof(mut self) -> Vec<Frame> {
        let deadline = Instant::now() + DEADLINE;
        while self.read_some() != Some(0) {
            assert!(Instant::now() < deadline, "bridge kept the connection open");
        }
        self.pending.into_iter().collect()
    }

    fn expect_eof(&mut self) {
        let deadline = Instant::now() + DEADLINE;
        while self.read_some() != Some(0) {
            assert!(Instant::now() < deadline, "bridge kept the connection open");
        }
    }
}

fn listener() -> (TcpListener, BridgeConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = BridgeConfig {
        endpoint: Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        },
        retry_fast_ms: 10,
        shutdown_timeout_ms: 1_000,
        module_path: Some("/opt/host/scripts".into()),
        ..BridgeConfig::default()
    };
    (listener, config)
}

fn catalog() -> StaticCatalog {
    StaticCatalog::new(vec![CatalogNode::folder(
        "VST",
        vec![
            CatalogNode::item("Reverb", "vst:reverb"),
            CatalogNode::item("Delay", "vst:delay"),
        ],
    )])
}

fn builder(config: BridgeConfig) -> BridgeBuilder {
    Bridge::builder().config(config).catalog(catalog())
}

/// Ready announcement, then a batch answered in order with the echoed id.
#[test]
fn test_batch_round_trip() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);

    controller.send(42, "ready;plugins;bogus,1,2");

    assert_eq!(
        controller.recv_text(&mut bridge),
        (42, "SPAGHETTI".to_string())
    );
    assert_eq!(
        controller.recv_text(&mut bridge),
        (42, "0,Reverb,vst:reverb|1,Delay,vst:delay".to_string())
    );
    assert_eq!(
        controller.recv_text(&mut bridge),
        (42, "ERROR:bogus:unknown action: bogus".to_string())
    );

    assert!(bridge.is_connected());
    assert_eq!(bridge.connection_state(), ConnectionState::Connected);
    assert_eq!(bridge.session().poll_interval(), 1);
}

/// Each response echoes the id of the request it answers.
#[test]
fn test_responses_echo_request_ids() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);

    controller.send(7, "path");
    controller.send(8, "load_item,1");
    controller.send(9, "load_item,5");

    assert_eq!(
        controller.recv_text(&mut bridge),
        (7, "/opt/host/scripts".to_string())
    );
    assert_eq!(controller.recv_text(&mut bridge), (8, "success".to_string()));
    assert_eq!(
        controller.recv_text(&mut bridge),
        (9, "ERROR:load_item:failed to load 5".to_string())
    );
}

/// A response larger than one chunk spans several ticks and arrives intact.
#[test]
fn test_large_response_is_chunked_across_ticks() {
    let (listener, config) = listener();
    let mut bridge = builder(config)
        .handle("blob", |ctx: &mut RequestContext<'_>, params: &[String]| {
            let len = params.first().and_then(|p| p.parse().ok()).unwrap_or(0);
            ctx.respond("x".repeat(len));
            Ok(())
        })
        .build()
        .unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);

    controller.send(3, "ready");
    controller.recv(&mut bridge);

    let before = bridge.ticks();
    controller.send(4, "blob,100000");
    controller.send(5, "path");

    let (id, text) = controller.recv_text(&mut bridge);
    assert_eq!(id, 4);
    assert_eq!(text.len(), 100_000);
    assert!(text.bytes().all(|b| b == b'x'));
    // 100036 bytes at 8192 per tick
    assert!(bridge.ticks() - before >= 12);

    // Queued behind the large response, not interleaved with it
    assert_eq!(
        controller.recv_text(&mut bridge),
        (5, "/opt/host/scripts".to_string())
    );
}

/// Controller disappears; the bridge reconnects and announces again.
#[test]
fn test_reconnects_after_controller_drop() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut first = Controller::accept(&listener);
    first.expect_ready(&mut bridge);
    drop(first);

    let mut second = Controller::accept(&listener);
    second.expect_ready(&mut bridge);

    second.send(11, "path");
    assert_eq!(
        second.recv_text(&mut bridge),
        (11, "/opt/host/scripts".to_string())
    );
}

/// A SHUTDOWN frame from the controller ends the connection like EOF.
#[test]
fn test_controller_shutdown_frame_closes_connection() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut first = Controller::accept(&listener);
    first.expect_ready(&mut bridge);
    first.send(99_999_999, "SHUTDOWN");

    let mut second = Controller::accept(&listener);
    second.expect_ready(&mut bridge);
}

/// Bridge shutdown sends SHUTDOWN and closes the channel.
#[test]
fn test_shutdown_announces_and_closes() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);

    bridge.shutdown();
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);

    let frame = controller.recv(&mut bridge);
    assert_eq!(frame.request_id(), RequestId::SHUTDOWN);
    assert_eq!(frame.payload(), SHUTDOWN_PAYLOAD);
    controller.expect_eof();
}

/// Shutdown during a chunked response finishes the frame before SHUTDOWN.
#[test]
fn test_shutdown_with_response_in_flight() {
    let (listener, config) = listener();
    let mut bridge = builder(config)
        .handle("blob", |ctx: &mut RequestContext<'_>, params: &[String]| {
            let len = params.first().and_then(|p| p.parse().ok()).unwrap_or(0);
            ctx.respond("x".repeat(len));
            Ok(())
        })
        .build()
        .unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);
    controller.send(4, "blob,100000");

    // Tick until the first chunk of the response arrives
    let deadline = Instant::now() + DEADLINE;
    loop {
        assert!(Instant::now() < deadline, "response never started");
        bridge.tick();
        match controller.read_some() {
            Some(0) => panic!("bridge closed the connection"),
            Some(_) => break,
            None => {}
        }
    }
    assert!(bridge.session().is_writing());

    // Drain on another thread so the rest of the response can flow
    let reader = std::thread::spawn(move || controller.read_to_eof());
    bridge.shutdown();
    let frames = reader.join().unwrap();

    assert_eq!(frames.len(), 2, "expected the response then SHUTDOWN");
    assert_eq!(frames[0].request_id().value(), 4);
    assert_eq!(frames[0].payload_len(), 100_000);
    assert_eq!(frames[1].request_id(), RequestId::SHUTDOWN);
    assert_eq!(frames[1].payload(), SHUTDOWN_PAYLOAD);
}

/// Garbage before a frame is skipped by the reader.
#[test]
fn test_reader_resyncs_after_garbage() {
    let (listener, config) = listener();
    let mut bridge = builder(config).build().unwrap();

    let mut controller = Controller::accept(&listener);
    controller.expect_ready(&mut bridge);

    controller.stream.write_all(b"noise START_xx").unwrap();
    controller.send(21, "path");

    assert_eq!(
        controller.recv_text(&mut bridge),
        (21, "/opt/host/scripts".to_string())
    );
}

/// No controller: the bridge keeps retrying and ticks stay non-blocking.
#[test]
fn test_ticks_do_not_block_without_controller() {
    let (listener, config) = listener();
    drop(listener);
    let mut bridge = builder(config).build().unwrap();

    let started = Instant::now();
    for _ in 0..1_000 {
        bridge.tick();
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!bridge.is_connected());

    bridge.shutdown();
}

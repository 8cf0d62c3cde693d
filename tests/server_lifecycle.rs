//! End-to-end server scenarios over loopback TCP.
//!
//! Each test runs a full server around the simulated scope and a
//! recording advertiser double, drives it with a real client socket, and
//! observes the lifecycle through the facade.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tarang_io::config::NetworkConfig;
use tarang_io::discovery::Advertiser;
use tarang_io::protocol::{encode_frame, Command, HDR_SZ};
use tarang_io::scope::MockScope;
use tarang_io::server::{InterfaceServer, State};
use tarang_io::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AdvertiserEvent {
    Registered(u16),
    Unregistered,
}

/// Advertiser double that records every call instead of talking to mDNS.
#[derive(Clone, Default)]
struct RecordingAdvertiser {
    events: Arc<Mutex<Vec<AdvertiserEvent>>>,
}

impl RecordingAdvertiser {
    fn events(&self) -> Vec<AdvertiserEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Advertiser for RecordingAdvertiser {
    fn register(&mut self, _name: &str, _service_type: &str, port: u16) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(AdvertiserEvent::Registered(port));
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(AdvertiserEvent::Unregistered);
        Ok(())
    }
}

struct TestServer {
    server: InterfaceServer,
    scope: MockScope,
    advertiser: RecordingAdvertiser,
}

fn start_server() -> TestServer {
    let scope = MockScope::new();
    let advertiser = RecordingAdvertiser::default();
    let server = InterfaceServer::new(
        Box::new(scope.clone()),
        Box::new(advertiser.clone()),
        NetworkConfig::default(),
    )
    .unwrap();
    server.start();
    wait_for_state(&server, State::Started);
    TestServer {
        server,
        scope,
        advertiser,
    }
}

fn wait_for_state(server: &InterfaceServer, want: State) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if server.state() == want {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!(
        "server never reached {:?}, still {:?}",
        want,
        server.state()
    );
}

fn connect_control(server: &InterfaceServer) -> TcpStream {
    let port = server.control_port().expect("control port bound");
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn send_cmd(stream: &mut TcpStream, cmd: Command, payload: &[u8]) {
    let mut bytes = Vec::new();
    encode_frame(cmd, payload, &mut bytes);
    stream.write_all(&bytes).unwrap();
}

/// Read one reply frame and return its payload, asserting the echoed cmd.
fn read_reply(stream: &mut TcpStream, cmd: Command) -> Vec<u8> {
    let mut header = [0u8; HDR_SZ];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(header[2], cmd as u8, "reply echoes the request cmd");
    let len = u16::from_le_bytes([header[0], header[1]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    payload
}

/// Drain until the peer closes; returns true if the close was observed.
fn wait_for_close(stream: &mut TcpStream) -> bool {
    let mut sink = [0u8; 4096];
    loop {
        match stream.read(&mut sink) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

#[test]
fn serial_round_trip_uses_fallback() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::Serial, &[]);
    let payload = read_reply(&mut control, Command::Serial);
    assert_eq!(payload, b"0254301KA16");
}

#[test]
fn pic_firmware_version_is_little_endian() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::PicFwVersion, &[]);
    let payload = read_reply(&mut control, Command::PicFwVersion);
    assert_eq!(payload, 0x0400u32.to_le_bytes());
}

#[test]
fn empty_replies_are_suppressed() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    // FLUSH produces no bytes; the next bytes on the wire must be the
    // SERIAL reply.
    send_cmd(&mut control, Command::Flush, &[]);
    send_cmd(&mut control, Command::Serial, &[]);
    let payload = read_reply(&mut control, Command::Serial);
    assert_eq!(payload.len(), 11);
    assert!(fixture.scope.flush_count() >= 1);
}

#[test]
fn flash_fpga_acks_with_ff() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    let firmware = vec![0xA5u8; 1024];
    send_cmd(&mut control, Command::FlashFpga, &firmware);
    let payload = read_reply(&mut control, Command::FlashFpga);
    assert_eq!(payload, vec![0xFF]);
    assert_eq!(fixture.scope.flashed_bytes(), Some(1024));
}

#[test]
fn register_write_then_read_back() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    // SET ctrl=1 addr=0x0010 len=2 data=[0xAB, 0xCD]; no reply expected
    send_cmd(
        &mut control,
        Command::Set,
        &[0x01, 0x10, 0x00, 0x02, 0x00, 0xAB, 0xCD],
    );
    // GET echoes the header followed by the register bytes
    send_cmd(&mut control, Command::Get, &[0x01, 0x10, 0x00, 0x02, 0x00]);
    let payload = read_reply(&mut control, Command::Get);
    assert_eq!(payload, vec![0x01, 0x10, 0x00, 0x02, 0x00, 0xAB, 0xCD]);
}

#[test]
fn inline_data_command_returns_samples() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::Data, &1024u16.to_le_bytes());
    let payload = read_reply(&mut control, Command::Data);
    assert_eq!(payload.len(), 1024);
}

#[test]
fn acquisition_command_returns_samples() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::Acquisition, &[]);
    let payload = read_reply(&mut control, Command::Acquisition);
    assert!(!payload.is_empty());
}

#[test]
fn data_port_handoff_streams_acquisitions() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::DataPort, &[]);
    let payload = read_reply(&mut control, Command::DataPort);
    assert_eq!(payload.len(), 2);
    let port = u16::from_le_bytes([payload[0], payload[1]]);
    assert_eq!(Some(port), fixture.server.data_port());

    let mut data = TcpStream::connect(("127.0.0.1", port)).unwrap();
    data.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut block = [0u8; 4096];
    let n = data.read(&mut block).unwrap();
    assert!(n > 0, "data socket delivers at least one byte block");
}

#[test]
fn inline_data_rejected_while_data_session_active() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::DataPort, &[]);
    let payload = read_reply(&mut control, Command::DataPort);
    let port = u16::from_le_bytes([payload[0], payload[1]]);
    let _data = TcpStream::connect(("127.0.0.1", port)).unwrap();

    // inline DATA while the data socket streams: no reply, session stops
    send_cmd(&mut control, Command::Data, &[0x00, 0x04]);
    assert!(wait_for_close(&mut control));
    wait_for_state(&fixture.server, State::Stopped);
}

#[test]
fn disconnect_stops_and_server_restarts_cleanly() {
    let fixture = start_server();
    let first_port = fixture.server.control_port().unwrap();
    let mut control = connect_control(&fixture.server);

    send_cmd(&mut control, Command::Disconnect, &[]);
    assert!(wait_for_close(&mut control), "no reply, socket just closes");
    wait_for_state(&fixture.server, State::Stopped);
    assert!(fixture.scope.flush_count() >= 1);

    // a fresh start binds fresh sockets and accepts again
    fixture.server.start();
    wait_for_state(&fixture.server, State::Started);
    assert!(fixture.server.control_port().unwrap() != 0);
    let mut control = connect_control(&fixture.server);
    send_cmd(&mut control, Command::Serial, &[]);
    let payload = read_reply(&mut control, Command::Serial);
    assert_eq!(payload.len(), 11);
    let _ = first_port;
}

#[test]
fn scope_failure_escalates_to_destroyed() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    fixture.scope.set_acquisition_failure(true);
    send_cmd(&mut control, Command::Acquisition, &[]);

    wait_for_state(&fixture.server, State::Destroyed);

    // Destroyed is absorbing: a new start request changes nothing
    fixture.server.start();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(fixture.server.state(), State::Destroyed);
}

#[test]
fn fragmented_frame_reassembles_to_one_write() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    let mut bytes = Vec::new();
    encode_frame(
        Command::Set,
        &[0x02, 0x20, 0x00, 0x02, 0x00, 0x11, 0x22],
        &mut bytes,
    );

    // one SET split across three socket writes
    control.write_all(&bytes[..2]).unwrap();
    thread::sleep(Duration::from_millis(50));
    control.write_all(&bytes[2..6]).unwrap();
    thread::sleep(Duration::from_millis(50));
    control.write_all(&bytes[6..]).unwrap();
    thread::sleep(Duration::from_millis(100));

    let writes = fixture.scope.register_writes();
    assert_eq!(writes.len(), 1, "exactly one scope write");
    assert_eq!(writes[0], (0x02, 0x0020, vec![0x11, 0x22]));

    // stream is still aligned: the next command round-trips
    send_cmd(&mut control, Command::Serial, &[]);
    let payload = read_reply(&mut control, Command::Serial);
    assert_eq!(payload.len(), 11);
    assert_eq!(fixture.server.state(), State::Started);
}

#[test]
fn unknown_command_terminates_session() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    control.write_all(&[0, 0, 0xEE]).unwrap();
    assert!(wait_for_close(&mut control));
    wait_for_state(&fixture.server, State::Stopped);
}

#[test]
fn advertiser_visible_until_client_claims_scope() {
    let fixture = start_server();

    // registered as soon as the server is up, with the control port;
    // Started can precede the register call by a beat, so poll
    let port = fixture.server.control_port().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while fixture.advertiser.events().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        fixture.advertiser.events(),
        vec![AdvertiserEvent::Registered(port)]
    );

    // claiming the scope unregisters it
    let _control = connect_control(&fixture.server);
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if fixture
            .advertiser
            .events()
            .contains(&AdvertiserEvent::Unregistered)
        {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        fixture.advertiser.events(),
        vec![
            AdvertiserEvent::Registered(port),
            AdvertiserEvent::Unregistered
        ]
    );
}

#[test]
fn server_settles_in_stopped_without_start() {
    let scope = MockScope::new();
    let server = InterfaceServer::new(
        Box::new(scope),
        Box::new(RecordingAdvertiser::default()),
        NetworkConfig::default(),
    )
    .unwrap();

    // Uninitialized drains to Stopped on the first manager tick
    wait_for_state(&server, State::Stopped);
    assert_eq!(server.control_port(), None);
}

#[test]
fn state_callback_fires_from_manager() {
    let scope = MockScope::new();
    let server = InterfaceServer::new(
        Box::new(scope),
        Box::new(RecordingAdvertiser::default()),
        NetworkConfig::default(),
    )
    .unwrap();

    let seen: Arc<Mutex<Vec<State>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    server.set_state_callback(move |state| sink.lock().unwrap().push(state));

    server.start();
    wait_for_state(&server, State::Started);
    server.stop();
    wait_for_state(&server, State::Stopped);

    let states = seen.lock().unwrap().clone();
    assert!(states.contains(&State::Starting));
    assert!(states.contains(&State::Started));
    assert!(states.contains(&State::Stopping));
    assert_eq!(states.last(), Some(&State::Stopped));
}

#[test]
fn destroy_terminates_while_client_connected() {
    let fixture = start_server();
    let mut control = connect_control(&fixture.server);

    // session thread is parked in recv; destroy must still complete
    fixture.server.destroy();
    wait_for_state(&fixture.server, State::Destroyed);
    assert!(wait_for_close(&mut control));
}

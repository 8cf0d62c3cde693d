//! Control session: accept one client, then loop receive → dispatch → reply.
//!
//! The session owns both listening sockets for its lifetime. The control
//! listener feeds this thread; the data listener is held until the client
//! asks for the bulk data path with `DATA_PORT`, at which point it moves
//! into the data session thread.

use crate::error::{Error, Result};
use crate::protocol::{Command, ControllerMessage, Frame, FrameBuffer, BUF_SIZE, HDR_SZ};
use crate::server::state::{Shared, State};
use crate::server::{data, finish_session, net};
use crossbeam_channel::Sender;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Serial reported for factory-fresh scopes whose OTP serial is blank.
const FALLBACK_SERIAL: &[u8; 11] = b"0254301KA16";

/// Serial reply length; the client reads exactly this many bytes.
const SERIAL_LEN: usize = 11;

/// What the dispatch loop should do after a command.
enum Flow {
    Continue,
    /// Client asked to disconnect; leave the session cleanly.
    Disconnect,
}

pub(crate) fn spawn(shared: Arc<Shared>, ready: Sender<u16>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tarang.server.control-socket".to_string())
        .spawn(move || {
            let result = ControlSession::new(Arc::clone(&shared), ready).run();
            finish_session(&shared, "control", result);
        })
}

struct ControlSession {
    shared: Arc<Shared>,
    ready: Sender<u16>,
    data_listener: Option<TcpListener>,
}

impl ControlSession {
    fn new(shared: Arc<Shared>, ready: Sender<u16>) -> Self {
        ControlSession {
            shared,
            ready,
            data_listener: None,
        }
    }

    fn run(mut self) -> Result<()> {
        // give the previous session's sockets a moment to drain
        thread::sleep(Duration::from_millis(100));

        let (ctrl_listener, ctrl_port) = net::bind_listener()?;
        self.shared.sockets.lock().ctrl_listener = Some(ctrl_listener.try_clone()?);
        self.shared.control_port.store(ctrl_port, Ordering::SeqCst);
        log::info!("Control socket listening on 0.0.0.0:{}", ctrl_port);

        let (data_listener, data_port) = net::bind_listener()?;
        self.shared.sockets.lock().data_listener = Some(data_listener.try_clone()?);
        self.shared.data_port.store(data_port, Ordering::SeqCst);
        log::info!("Data socket listening on 0.0.0.0:{}", data_port);
        self.data_listener = Some(data_listener);

        // both listeners are bound: the lifecycle manager may go Started
        let _ = self.ready.send(data_port);

        self.shared.advertiser.lock().register(
            &self.shared.service_name,
            &self.shared.service_type,
            ctrl_port,
        )?;

        let (mut stream, peer) = ctrl_listener.accept()?;
        log::info!("Connection accepted from {}", peer);

        // scope is claimed; stop advertising it
        if let Err(e) = self.shared.advertiser.lock().unregister() {
            log::warn!("Failed to unregister service: {}", e);
        }
        self.shared.sockets.lock().ctrl_stream = Some(stream.try_clone()?);
        self.shared.connected.store(true, Ordering::SeqCst);

        let mut frames = FrameBuffer::new();
        let mut tx_buf: Vec<u8> = Vec::with_capacity(BUF_SIZE);

        while self.shared.connected.load(Ordering::SeqCst) {
            let n = stream.read(frames.spare())?;
            if n == 0 {
                // EOF also shows up here when a disconnect shuts our own
                // socket; only a live session treats it as a client close
                if self.shared.connected.load(Ordering::SeqCst) {
                    log::info!("Client closed the control connection");
                    self.shared.request(State::Stopped);
                }
                return Ok(());
            }
            frames.advance(n);

            while let Some(frame) = frames.next_frame()? {
                match self.dispatch(&frame, &mut stream, &mut tx_buf)? {
                    Flow::Continue => {}
                    Flow::Disconnect => {
                        self.shared.request(State::Stopped);
                        return Ok(());
                    }
                }
            }
            frames.compact();
        }
        Ok(())
    }

    /// Execute one command and send the reply, if the command has one.
    ///
    /// The reply is assembled in `tx_buf` behind a header placeholder;
    /// the length field is patched in once the payload size is known.
    /// Zero-length replies are suppressed entirely: no bytes go on the
    /// wire for `FLUSH`, `SET` and `DISCONNECT`.
    fn dispatch(&mut self, frame: &Frame, stream: &mut TcpStream, tx_buf: &mut Vec<u8>) -> Result<Flow> {
        let Some(cmd) = Command::from_u8(frame.cmd) else {
            return Err(Error::Protocol(format!(
                "unsupported command {}",
                frame.cmd
            )));
        };

        tx_buf.clear();
        tx_buf.extend_from_slice(&[0, 0, frame.cmd]);
        let mut flow = Flow::Continue;

        match cmd {
            Command::Serial => {
                let serial = self.shared.scope.lock().serial()?;
                let mut bytes = serial.into_bytes();
                if bytes.is_empty() {
                    bytes.extend_from_slice(FALLBACK_SERIAL);
                }
                bytes.resize(SERIAL_LEN, 0);
                tx_buf.extend_from_slice(&bytes);
            }
            Command::PicFwVersion => {
                let version = self.shared.scope.lock().pic_firmware_version()?;
                tx_buf.extend_from_slice(&version.to_le_bytes());
            }
            Command::Flush => {
                self.shared.scope.lock().flush_data_pipe()?;
            }
            Command::FlashFpga => {
                self.shared.scope.lock().flash_fpga(&frame.payload)?;
                tx_buf.push(0xFF);
            }
            Command::Disconnect => {
                log::info!("Received disconnect request from client");
                self.shared.scope.lock().flush_data_pipe()?;
                flow = Flow::Disconnect;
            }
            Command::Data => {
                self.ensure_inline_data_allowed("DATA")?;
                if frame.payload.len() < 2 {
                    return Err(Error::Protocol("DATA request missing length".to_string()));
                }
                let want = u16::from_le_bytes([frame.payload[0], frame.payload[1]]) as usize;
                tx_buf.resize(HDR_SZ + want, 0);
                let n = self.shared.scope.lock().get_data(&mut tx_buf[HDR_SZ..])?;
                tx_buf.truncate(HDR_SZ + n);
            }
            Command::DataPort => {
                let listener = self.data_listener.take().ok_or_else(|| {
                    Error::Protocol("DATA_PORT requested twice in one session".to_string())
                })?;
                log::info!("Starting data server...");
                let handle = data::spawn(Arc::clone(&self.shared), listener)?;
                *self.shared.data_thread.lock() = Some(handle);
                self.shared.data_session.store(true, Ordering::SeqCst);
                let port = self.shared.data_port.load(Ordering::SeqCst);
                tx_buf.extend_from_slice(&port.to_le_bytes());
            }
            Command::Acquisition => {
                self.ensure_inline_data_allowed("ACQUISITION")?;
                tx_buf.resize(BUF_SIZE, 0);
                loop {
                    let n = self
                        .shared
                        .scope
                        .lock()
                        .get_acquisition(&mut tx_buf[HDR_SZ..])?;
                    if n > 0 {
                        tx_buf.truncate(HDR_SZ + n);
                        break;
                    }
                }
            }
            Command::Set => {
                let (ctrl_msg, data) = ControllerMessage::parse(&frame.payload)?;
                let len = ctrl_msg.len as usize;
                if data.len() < len {
                    return Err(Error::Protocol(format!(
                        "SET carries {} of {} register bytes",
                        data.len(),
                        len
                    )));
                }
                self.shared.scope.lock().set_controller_register(
                    ctrl_msg.ctrl,
                    ctrl_msg.addr,
                    &data[..len],
                )?;
            }
            Command::Get => {
                let (ctrl_msg, _) = ControllerMessage::parse(&frame.payload)?;
                ctrl_msg.encode_into(tx_buf);
                let start = tx_buf.len();
                tx_buf.resize(start + ctrl_msg.len as usize, 0);
                self.shared.scope.lock().get_controller_register(
                    ctrl_msg.ctrl,
                    ctrl_msg.addr,
                    &mut tx_buf[start..],
                )?;
            }
        }

        let payload_len = tx_buf.len() - HDR_SZ;
        if payload_len > 0 {
            let len = (payload_len as u16).to_le_bytes();
            tx_buf[0] = len[0];
            tx_buf[1] = len[1];
            stream.write_all(tx_buf)?;
        }
        Ok(flow)
    }

    /// Inline data commands and the dedicated data socket are mutually
    /// exclusive per session.
    fn ensure_inline_data_allowed(&self, what: &str) -> Result<()> {
        if self.shared.data_session.load(Ordering::SeqCst) {
            return Err(Error::Protocol(format!(
                "{} request while the data socket is streaming",
                what
            )));
        }
        Ok(())
    }
}

//! Data session: stream raw acquisition bytes to a second client.
//!
//! One-way traffic only; the server never reads from the data socket.
//! There is no framing either, the client consumes the byte stream as
//! fast as the scope produces it.

use crate::error::Result;
use crate::protocol::BUF_SIZE;
use crate::server::state::Shared;
use crate::server::{finish_session, net};
use std::io::{self, Write};
use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Requested kernel send buffer on the data socket. Bulk acquisitions
/// arrive in 64 KiB units; a deeper buffer rides out client-side stalls.
const DATA_SOCKET_BUFFER_SIZE: usize = 256 * 1024;

pub(crate) fn spawn(shared: Arc<Shared>, listener: TcpListener) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tarang.server.data-socket".to_string())
        .spawn(move || {
            let result = run(&shared, listener);
            finish_session(&shared, "data", result);
        })
}

fn run(shared: &Arc<Shared>, listener: TcpListener) -> Result<()> {
    log::info!("Waiting for data connection to be opened");
    let (mut stream, peer) = listener.accept()?;
    log::info!("Connection accepted on data socket from {}", peer);
    shared.sockets.lock().data_stream = Some(stream.try_clone()?);

    let granted = net::set_send_buffer(&stream, DATA_SOCKET_BUFFER_SIZE)?;
    log::debug!("Data socket send buffer = {} bytes", granted);

    let mut buf = vec![0u8; BUF_SIZE];
    while shared.connected.load(Ordering::SeqCst) {
        let n = shared.scope.lock().get_acquisition(&mut buf)?;
        stream.write_all(&buf[..n])?;
    }

    log::info!("Data session finished");
    Ok(())
}

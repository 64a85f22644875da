use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::thread::sleep;
use std::{io, net, time};

use serde::{Deserialize, Serialize};

use crate::pipeline;
use crate::relay::RelayParameters;
use crate::sink::SinkRequest;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SocketParameters {
    /// The ip address the listener should bind to.
    pub address: String,
    /// The port the listener should bind to.
    pub port: u32,
    /// Seconds without a complete line before an idle connection is dropped.
    pub idle_timeout_secs: u64,
}

pub fn socket_thread(
    tx: Sender<SinkRequest>,
    thread_finished: Arc<AtomicBool>,
    params: SocketParameters,
    relay_params: RelayParameters,
) {
    let listener = match net::TcpListener::bind(format!("{}:{}", params.address, params.port)) {
        Ok(listener) => listener,
        Err(err) => {
            log::error!(target: "wxrelayd::tcp", "Could not open tcp listener: '{}'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    };
    match listener.set_nonblocking(true) {
        Ok(_) => log::debug!(target: "wxrelayd::tcp", "Set listener to nonblocking mode!"),
        Err(err) => {
            log::error!(target: "wxrelayd::tcp", "Could not set listener to nonblocking mode: '{}'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    }

    match listener.local_addr() {
        Ok(res) => {
            log::info!(target: "wxrelayd::tcp", "Listening for stations on: '{}'", res);
        }
        Err(err) => {
            log::error!(target: "wxrelayd::tcp", "Could not get listener address: '{}'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    }

    let poll_interval = time::Duration::from_millis(100);
    let idle_timeout = time::Duration::from_secs(params.idle_timeout_secs);

    while !thread_finished.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(res) => res,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                sleep(poll_interval);
                continue;
            }
            Err(msg) => {
                log::error!(target: "wxrelayd::tcp", "Listener cannot accept connection: '{}'", msg);
                continue;
            }
        };

        log::info!(target: "wxrelayd::tcp", "Station connected from '{}'", peer);

        // The accepted stream may inherit the listener's nonblocking mode.
        match stream.set_nonblocking(false) {
            Ok(_) => {}
            Err(err) => {
                log::error!(target: "wxrelayd::tcp", "Could not set connection to blocking mode: '{}'", err);
                continue;
            }
        }

        let connection_tx = tx.clone();
        let connection_relay = relay_params.clone();
        let connection_finished = Arc::clone(&thread_finished);
        match thread::Builder::new()
            .name(format!("pipeline-{}", peer))
            .spawn(move || {
                pipeline::run(
                    stream,
                    peer,
                    connection_tx,
                    connection_relay,
                    idle_timeout,
                    connection_finished,
                );
            }) {
            Ok(_) => log::debug!(target: "wxrelayd::tcp", "Started pipeline thread for '{}'!", peer),
            Err(err) => {
                log::error!(target: "wxrelayd::tcp", "Could not start pipeline thread: '{}'", err);
            }
        };
    }
}

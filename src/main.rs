extern crate chrono;
extern crate clap;
extern crate ctrlc;
extern crate log;
extern crate log4rs;

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use std::thread;

use serde::{Deserialize, Serialize};

use std::process::exit;

use clap::App;
use std::fs::File;
use std::io::Read;

mod framing;
mod pipeline;
mod record;
mod relay;
mod sink;
mod socket;
mod units;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Configuration {
    socket_parameters: socket::SocketParameters,
    relay_parameters: relay::RelayParameters,
    sink_parameters: sink::SinkParameters,
}

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();
    let configuration_path = matches
        .value_of("config")
        .unwrap_or("resources/wxrelayd.yml");

    match log4rs::init_file("resources/log.yml", Default::default()) {
        Ok(_) => {}
        Err(err) => {
            log::error!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let mut configuration_file = match File::open(configuration_path) {
        Ok(file) => file,
        Err(err) => {
            log::error!(target: "wxrelayd", "Cannot open the configuration file '{}': '{}'", configuration_path, err);
            return;
        }
    };

    let mut configuration_string = String::new();
    match configuration_file.read_to_string(&mut configuration_string) {
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "wxrelayd", "Cannot read the configuration from file: '{}'", err);
            return;
        }
    };

    let configuration = match serde_yaml::from_str::<Configuration>(configuration_string.as_str()) {
        Ok(res) => res,
        Err(err) => {
            log::error!(target: "wxrelayd", "Cannot deserialize the configuration: '{}'", err);
            return;
        }
    };

    let (tx, rx): (Sender<sink::SinkRequest>, Receiver<sink::SinkRequest>) = mpsc::channel();

    let terminate_program = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let terminate_main_thread = Arc::clone(&terminate_program);
    let terminate_socket_thread = Arc::clone(&terminate_program);
    let terminate_sink_thread = Arc::clone(&terminate_program);

    let socket_configuration = configuration.socket_parameters.clone();
    let relay_configuration = configuration.relay_parameters.clone();
    let socket_thread = match thread::Builder::new().name("socket".to_string()).spawn(move || {
        socket::socket_thread(
            tx,
            terminate_socket_thread,
            socket_configuration,
            relay_configuration,
        );
    }) {
        Ok(socket_handle) => socket_handle,
        Err(err) => {
            log::error!(target: "wxrelayd", "Cannot start the tcp listener thread: '{}'", err);
            exit(201);
        }
    };

    let sink_configuration = configuration.sink_parameters.clone();
    let sink_thread = match thread::Builder::new().name("sink".to_string()).spawn(move || {
        sink::sink_thread(rx, terminate_sink_thread, sink_configuration);
    }) {
        Ok(sink_handle) => sink_handle,
        Err(err) => {
            log::error!(target: "wxrelayd", "Cannot start the sink thread: '{}'", err);
            exit(202);
        }
    };

    ctrlc::set_handler(move || {
        log::info!(target: "wxrelayd", "Termination signal received!");
        terminate_main_thread.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    match socket_thread.join() {
        Ok(_) => log::debug!(target: "wxrelayd", "Joined tcp listener thread!"),
        Err(_) => {
            log::error!(target: "wxrelayd", "Could not join the tcp listener thread!");
            exit(301);
        }
    };
    match sink_thread.join() {
        Ok(_) => log::debug!(target: "wxrelayd", "Joined sink thread!"),
        Err(_) => {
            log::error!(target: "wxrelayd", "Could not join the sink thread!");
            exit(301);
        }
    };

    log::info!(target: "wxrelayd", "Exiting");
    exit(0);
}

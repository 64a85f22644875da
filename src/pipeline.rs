//! Per-connection ingestion pipeline: frame a line, decode it, build both
//! relay payloads, deliver them, archive the outcome.
//!
//! Every failure is contained at the record boundary. A malformed or
//! undeliverable record goes to the rejects sink and the pipeline waits for
//! the next line; only framing-level conditions (idle timeout, end of
//! stream) end the connection, and none of them reach other connections.
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time;

use crate::framing::{FramingError, LineFramer};
use crate::record;
use crate::relay;
use crate::sink::SinkRequest;

fn reject(tx: &Sender<SinkRequest>, line: String) {
    match tx.send(SinkRequest::Reject(line)) {
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "wxrelayd::pipeline", "Could not send line to rejects sink: '{}'", err);
        }
    }
}

/// Runs one record through decode, payload building, both deliveries and
/// archival. Any failure routes the raw line to the rejects sink; the
/// generated update URL is logged before delivery so failed updates can be
/// replayed by hand.
fn process_line(
    raw: &str,
    client: &reqwest::blocking::Client,
    relay_params: &relay::RelayParameters,
    tx: &Sender<SinkRequest>,
) {
    let decoded = match record::decode_line(raw) {
        Ok(decoded) => decoded,
        Err(err) => {
            log::warn!(target: "wxrelayd::pipeline", "Discarding malformed record: '{}'", err);
            reject(tx, raw.to_string());
            return;
        }
    };
    log::debug!(target: "wxrelayd::pipeline", "Decoded observation: {:?}", decoded);

    let url = match relay::build_wunderground_url(&relay_params.wunderground, &decoded) {
        Ok(url) => url,
        Err(err) => {
            log::warn!(target: "wxrelayd::pipeline", "Cannot build update URL: '{}'", err);
            reject(tx, raw.to_string());
            return;
        }
    };
    match tx.send(SinkRequest::UrlLog(url.to_string())) {
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "wxrelayd::pipeline", "Could not send URL to url log sink: '{}'", err);
        }
    }

    match relay::deliver_http(client, url) {
        Ok(_) => {}
        Err(err) => {
            log::warn!(target: "wxrelayd::pipeline", "Weather Underground update failed: '{}'", err);
            reject(tx, raw.to_string());
            return;
        }
    }

    let frame = relay::build_aprs_frame(&relay_params.cwop, &decoded);
    match relay::deliver_cwop(&relay_params.cwop, frame.as_str()) {
        Ok(_) => {}
        Err(err) => {
            log::warn!(target: "wxrelayd::pipeline", "CWOP update failed: '{}'", err);
            reject(tx, raw.to_string());
            return;
        }
    }

    let entry = format!("{},{}", decoded.server_timestamp.timestamp(), raw);
    match tx.send(SinkRequest::Archive(entry)) {
        Ok(_) => {
            log::info!(target: "wxrelayd::pipeline", "Relayed and archived observation starting at {}", decoded.start);
        }
        Err(err) => {
            log::error!(target: "wxrelayd::pipeline", "Could not send record to archive sink: '{}'", err);
        }
    }
}

/// Thread function for one station connection.
///
/// Reads line-feed-terminated observations until the station disconnects,
/// the idle timeout expires, or the daemon shuts down. Records are processed
/// strictly one after another; a failing record never ends the connection.
pub fn run(
    stream: TcpStream,
    peer: SocketAddr,
    tx: Sender<SinkRequest>,
    relay_params: relay::RelayParameters,
    idle_timeout: time::Duration,
    thread_finish: Arc<AtomicBool>,
) {
    match stream.set_read_timeout(Some(idle_timeout)) {
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "wxrelayd::pipeline", "Could not set read timeout for '{}': '{}'", peer, err);
            return;
        }
    }

    let client = match reqwest::blocking::Client::builder()
        .timeout(time::Duration::from_secs(relay_params.wunderground.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            log::error!(target: "wxrelayd::pipeline", "Could not create http client for '{}': '{}'", peer, err);
            return;
        }
    };

    let mut framer = LineFramer::new(&stream);

    while !thread_finish.load(Ordering::SeqCst) {
        let line = match framer.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::debug!(target: "wxrelayd::pipeline", "Station '{}' closed the connection", peer);
                break;
            }
            Err(FramingError::Timeout) => {
                log::info!(target: "wxrelayd::pipeline", "No data from '{}' within the idle timeout, disconnecting", peer);
                break;
            }
            Err(FramingError::Incomplete { partial }) => {
                log::warn!(target: "wxrelayd::pipeline", "Stream from '{}' ended mid-line, rejecting partial buffer", peer);
                reject(&tx, String::from_utf8_lossy(partial.as_slice()).into_owned());
                break;
            }
            Err(FramingError::Read(err)) => {
                log::error!(target: "wxrelayd::pipeline", "Read from '{}' failed: '{}'", peer, err);
                break;
            }
        };

        let raw = match std::str::from_utf8(line.as_slice()) {
            Ok(raw) => raw.to_string(),
            Err(err) => {
                log::warn!(target: "wxrelayd::pipeline", "Received non UTF-8 line from '{}': '{}'", peer, err);
                reject(&tx, String::from_utf8_lossy(line.as_slice()).into_owned());
                continue;
            }
        };

        log::debug!(target: "wxrelayd::pipeline", "Received line from '{}': '{}'", peer, raw);
        process_line(raw.as_str(), &client, &relay_params, &tx);
    }

    log::info!(target: "wxrelayd::pipeline", "Pipeline for '{}' finished", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{CwopParameters, RelayParameters, WundergroundParameters};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    const EXAMPLE_LINE: &str =
        "1600000000,300,20.5,18.0,23.1,55.0,50.0,60.0,0.0,1.2,10.0,0.0,25.0,NW,NW,150.0,300,1013.2,15.0";

    /// Accepts `connections` HTTP requests and answers every one with an
    /// empty 200 response.
    fn mock_wunderground(connections: usize) -> (thread::JoinHandle<()>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buffer = [0u8; 2048];
                let mut request = Vec::new();
                loop {
                    let count = stream.read(&mut buffer).unwrap();
                    request.extend_from_slice(&buffer[..count]);
                    if count == 0 || request.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .unwrap();
            }
        });
        (handle, port)
    }

    /// Accepts `connections` CWOP sessions and captures their lines.
    fn mock_cwop(connections: usize) -> (thread::JoinHandle<Vec<String>>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut lines = Vec::new();
            for _ in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                let reader = BufReader::new(stream);
                for line in reader.lines() {
                    lines.push(line.unwrap());
                }
            }
            lines
        });
        (handle, port)
    }

    fn test_relay_params(wu_port: u16, cwop_port: u16) -> RelayParameters {
        RelayParameters {
            wunderground: WundergroundParameters {
                endpoint: format!("http://127.0.0.1:{}/update", wu_port),
                station_id: "KTEST1".to_string(),
                password: "hunter2".to_string(),
                timeout_secs: 5,
            },
            cwop: CwopParameters {
                hostname: "127.0.0.1".to_string(),
                port: u32::from(cwop_port),
                station_id: "CWTEST".to_string(),
                passcode: "-1".to_string(),
                position: "9999.99N/88888.88W_".to_string(),
                client_tag: "wxrelayd".to_string(),
                timeout_secs: 5,
            },
        }
    }

    /// Runs the pipeline over a real socket pair against both mock services
    /// and returns everything the pipeline sent towards the sinks.
    fn run_pipeline_with_input(
        input: &'static [u8],
        relay_connections: usize,
    ) -> (Vec<SinkRequest>, Vec<String>) {
        let (wu_server, wu_port) = mock_wunderground(relay_connections);
        let (cwop_server, cwop_port) = mock_cwop(relay_connections);
        let relay_params = test_relay_params(wu_port, cwop_port);

        let inbound = TcpListener::bind("127.0.0.1:0").unwrap();
        let inbound_addr = inbound.local_addr().unwrap();
        let station = thread::spawn(move || {
            let mut stream = TcpStream::connect(inbound_addr).unwrap();
            stream.write_all(input).unwrap();
        });

        let (stream, peer) = inbound.accept().unwrap();
        let (tx, rx) = mpsc::channel();
        run(
            stream,
            peer,
            tx,
            relay_params,
            time::Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        );

        station.join().unwrap();
        wu_server.join().unwrap();
        let cwop_lines = cwop_server.join().unwrap();
        (rx.try_iter().collect(), cwop_lines)
    }

    #[test]
    fn relays_and_archives_a_valid_line() {
        let input: &'static [u8] =
            b"1600000000,300,20.5,18.0,23.1,55.0,50.0,60.0,0.0,1.2,10.0,0.0,25.0,NW,NW,150.0,300,1013.2,15.0\n";
        let (requests, cwop_lines) = run_pipeline_with_input(input, 1);

        assert_eq!(requests.len(), 2);
        match &requests[0] {
            SinkRequest::UrlLog(url) => {
                assert!(url.contains("tempf=68.9"));
                assert!(url.contains("humidity=55.0"));
            }
            other => panic!("unexpected first request: {:?}", other),
        }
        match &requests[1] {
            SinkRequest::Archive(entry) => {
                let (timestamp, line) = entry.split_at(entry.find(',').unwrap());
                assert!(timestamp.parse::<i64>().unwrap() > 0);
                assert_eq!(&line[1..], EXAMPLE_LINE);
            }
            other => panic!("unexpected second request: {:?}", other),
        }

        assert_eq!(cwop_lines.len(), 2);
        assert_eq!(cwop_lines[0], "user CWTEST pass -1 vers wxrelayd");
        assert!(cwop_lines[1].starts_with("CWTEST>APRS,TCPIP*:@"));
        assert!(cwop_lines[1].contains("315/006g016t069r...p...P005h55b10132"));
    }

    #[test]
    fn malformed_line_is_rejected_and_connection_survives() {
        let input: &'static [u8] =
            b"not,a,record\n1600000000,300,20.5,18.0,23.1,55.0,50.0,60.0,0.0,1.2,10.0,0.0,25.0,NW,NW,150.0,300,1013.2,15.0\n";
        let (requests, _cwop_lines) = run_pipeline_with_input(input, 1);

        assert_eq!(requests.len(), 3);
        match &requests[0] {
            SinkRequest::Reject(line) => assert_eq!(line, "not,a,record"),
            other => panic!("unexpected first request: {:?}", other),
        }
        assert!(matches!(&requests[1], SinkRequest::UrlLog(_)));
        assert!(matches!(&requests[2], SinkRequest::Archive(_)));
    }

    #[test]
    fn unterminated_trailing_line_goes_to_the_rejects_sink() {
        let input: &'static [u8] = b"1600000000,300,half";
        let (requests, _cwop_lines) = run_pipeline_with_input(input, 0);

        assert_eq!(requests.len(), 1);
        match &requests[0] {
            SinkRequest::Reject(line) => assert_eq!(line, "1600000000,300,half"),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn idle_connection_times_out_without_sink_traffic() {
        let inbound = TcpListener::bind("127.0.0.1:0").unwrap();
        let inbound_addr = inbound.local_addr().unwrap();
        let station = thread::spawn(move || {
            let stream = TcpStream::connect(inbound_addr).unwrap();
            // Hold the connection open without sending anything until the
            // pipeline has given up.
            thread::sleep(time::Duration::from_millis(400));
            drop(stream);
        });

        let (stream, peer) = inbound.accept().unwrap();
        let (tx, rx) = mpsc::channel();
        run(
            stream,
            peer,
            tx,
            test_relay_params(1, 2),
            time::Duration::from_millis(100),
            Arc::new(AtomicBool::new(false)),
        );

        station.join().unwrap();
        assert_eq!(rx.try_iter().count(), 0);
    }
}

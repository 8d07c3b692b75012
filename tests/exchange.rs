use solarmax::frame::{build_query, build_response, build_value_response};
use solarmax::{Address, Connection, ConnectionState, InverterClient, SkipProbe};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// A loopback stand-in for the inverter: answers every request with the
/// matching entry of `answers` (by code), or an empty body.
fn fake_inverter(
    device: Address,
    answers: Vec<(&'static str, u32)>,
    requests: usize,
) -> (u16, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut seen = vec![];
        for _ in 0..requests {
            let mut buffer = [0u8; 255];
            let n = socket.read(&mut buffer).unwrap();
            let request = String::from_utf8_lossy(&buffer[..n]).into_owned();
            let code = &request[13..16];
            let response = match answers.iter().find(|(c, _)| *c == code) {
                Some((c, value)) => build_value_response(device, c, *value),
                None => build_response(device, ""),
            };
            socket.write_all(response.as_bytes()).unwrap();
            seen.push(request);
        }
        seen
    });
    (port, handle)
}

fn client(port: u16, device_index: u8) -> InverterClient {
    let connection = Connection::new("127.0.0.1", port)
        .with_probe(Box::new(SkipProbe))
        .with_read_timeout(Some(Duration::from_secs(5)));
    let mut client = InverterClient::new(connection, device_index);
    client.open().unwrap();
    client
}

#[test]
fn query_address_of_device_one() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buffer = [0u8; 255];
        let n = socket.read(&mut buffer).unwrap();
        socket.write_all(b"{01;FB;18|64:ADR=1|04A9}").unwrap();
        String::from_utf8_lossy(&buffer[..n]).into_owned()
    });

    let mut client = client(port, 1);
    assert_eq!(client.connection().state(), ConnectionState::Connected);
    assert_eq!(client.query("ADR"), Some(1));
    assert_eq!(device.join().unwrap(), "{FB;01;16|64:ADR|0439}");

    client.disconnect();
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
}

#[test]
fn accessors_scale_readings() {
    let (port, device) = fake_inverter(
        Address(2),
        vec![
            ("PAC", 0x1F5),
            ("KDY", 123),
            ("UDC", 3456),
            ("IDC", 1234),
            ("KT0", 98765),
            ("SYS", 20004),
            ("SAL", 0),
            ("TYP", 20030),
        ],
        9,
    );
    let mut client = client(port, 2);

    assert_eq!(client.ac_output(), Some(250.5));
    assert_eq!(client.energy_day(), Some(12.3));
    assert_eq!(client.voltage_dc(), Some(345.6));
    assert_eq!(client.current_dc(), Some(12.34));
    assert_eq!(client.energy_total(), Some(98765));
    assert_eq!(client.status(), Some("Running on MPP"));
    assert_eq!(client.alarm_code(), Some("no error"));
    assert_eq!(client.model(), Some("SolarMax 4200S"));
    // answered with an empty body
    assert_eq!(client.relative_output(), None);
    assert_eq!(client.poll_ok, 9);
    assert_eq!(client.poll_errors, 0);

    let requests = device.join().unwrap();
    assert_eq!(requests[0], build_query(Address(2), "PAC"));
    assert_eq!(requests[8], build_query(Address(2), "PRL"));
}

#[test]
fn inverter_clock_is_assembled() {
    let (port, device) = fake_inverter(
        Address(1),
        vec![("DYR", 23), ("DMT", 6), ("DDY", 21), ("THR", 13), ("TMI", 5)],
        5,
    );
    let mut client = client(port, 1);

    let time = client.inverter_time().unwrap();
    assert_eq!(time.format("%F %H:%M").to_string(), "2023-06-21 13:05");
    device.join().unwrap();
}

#[test]
fn missing_reading_stops_inverter_clock() {
    let (port, device) = fake_inverter(Address(1), vec![("DYR", 2023)], 2);
    let mut client = client(port, 1);

    assert_eq!(client.inverter_time(), None);
    let requests = device.join().unwrap();
    assert_eq!(requests.len(), 2);
}

#[test]
fn lost_link_reads_as_absent_and_disconnects() {
    let (port, device) = fake_inverter(Address(1), vec![("PAC", 10)], 1);
    let mut client = client(port, 1);

    assert_eq!(client.ac_output(), Some(5.0));
    // the fake inverter hangs up after one answer
    device.join().unwrap();

    assert_eq!(client.ac_output(), None);
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
    assert_eq!(client.poll_errors, 1);
}

#[test]
fn split_answer_never_shifts_later_readings() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = thread::spawn(move || {
        let mut buffer = [0u8; 255];

        // first link: the PAC answer arrives in two segments
        let (mut socket, _) = listener.accept().unwrap();
        socket.read(&mut buffer).unwrap();
        let pac = build_value_response(Address(1), "PAC", 0x1F4);
        socket.write_all(&pac.as_bytes()[..10]).unwrap();
        thread::sleep(Duration::from_millis(200));
        let _ = socket.write_all(&pac.as_bytes()[10..]);

        // second link, after the client reconnected
        let (mut socket, _) = listener.accept().unwrap();
        for (code, value) in [("SYS", 20004u32), ("TYP", 20030)].iter() {
            socket.read(&mut buffer).unwrap();
            let answer = build_value_response(Address(1), code, *value);
            socket.write_all(answer.as_bytes()).unwrap();
        }
    });

    let mut client = client(port, 1);
    assert_eq!(client.query("PAC"), None);
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);

    client.open().unwrap();
    assert_eq!(client.query("SYS"), Some(20004));
    assert_eq!(client.query("TYP"), Some(20030));
    device.join().unwrap();
}

#[test]
fn answer_for_another_code_is_absent() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buffer = [0u8; 255];
        socket.read(&mut buffer).unwrap();
        let stale = build_value_response(Address(1), "SYS", 20004);
        socket.write_all(stale.as_bytes()).unwrap();
    });

    let mut client = client(port, 1);
    assert_eq!(client.inverter_type(), None);
    assert_eq!(client.poll_errors, 1);
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
    device.join().unwrap();
}

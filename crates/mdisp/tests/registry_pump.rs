// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end pump tests over a real Unix socket pair: boot broadcast,
//! registration round-trips, and a suspend/resume cycle across pumps.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use mdisp::registry::{ControlFlags, Outcome, RegistryService, Transport};
use mdisp::{Error, Message, MessageChannel};

struct SocketTransport {
    stream: UnixStream,
}

impl std::io::Read for SocketTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for SocketTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for SocketTransport {
    // The pump owns no reconnection policy here; a reset ends the test run.
    fn reconnect(&mut self) -> mdisp::Result<()> {
        Err(Error::ConnectionReset)
    }
}

fn compose(headers: &[&str], payload: &[u8]) -> Vec<u8> {
    Message {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        payload: payload.to_vec(),
    }
    .compose()
}

#[test]
fn test_boot_broadcast_then_register_and_list() {
    let (service_end, mut client) = UnixStream::pair().unwrap();

    let pump = thread::spawn(move || {
        let mut service = RegistryService::new();
        let mut transport = SocketTransport {
            stream: service_end,
        };
        let flags = ControlFlags::new();
        service.run(&mut transport, &flags)
    });

    // Boot: an intercept request carrying its filter as payload, then a
    // reregister broadcast.
    let mut chan = MessageChannel::new();
    let intercept = chan.read_message(&mut client).unwrap();
    assert!(intercept.has_header("Command: intercept"));
    assert_eq!(intercept.payload, b"Command: register\nClient closed\n");
    let reregister = chan.read_message(&mut client).unwrap();
    assert!(reregister.has_header("Command: reregister"));

    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 5:1",
                "Message ID: 0",
                "Action: add",
                "Length: 6",
            ],
            b"paint\n",
        ))
        .unwrap();
    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 7:2",
                "Message ID: 1",
                "Action: list",
            ],
            b"",
        ))
        .unwrap();

    let reply = chan.read_message(&mut client).unwrap();
    assert!(reply.has_header("To: 7:2"));
    assert!(reply.has_header("In response to: 1"));
    assert_eq!(reply.payload, b"paint\n");

    // Closing our end resets the pump; its transport refuses to reconnect.
    drop(client);
    assert!(matches!(pump.join().unwrap(), Err(Error::ConnectionReset)));
}

#[test]
fn test_payload_split_across_socket_writes() {
    let (service_end, mut client) = UnixStream::pair().unwrap();

    let pump = thread::spawn(move || {
        let mut service = RegistryService::new();
        let mut transport = SocketTransport {
            stream: service_end,
        };
        let flags = ControlFlags::new();
        service.run(&mut transport, &flags)
    });

    let mut chan = MessageChannel::new();
    chan.read_message(&mut client).unwrap();
    chan.read_message(&mut client).unwrap();

    // Headers first, then the payload in two delayed pieces.
    let message = compose(
        &[
            "Command: register",
            "Client ID: 5:1",
            "Message ID: 0",
            "Action: add",
            "Length: 9",
        ],
        b"keyboard\n",
    );
    let split = message.len() - 4;
    client.write_all(&message[..split]).unwrap();
    thread::sleep(Duration::from_millis(20));
    client.write_all(&message[split..]).unwrap();

    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 7:2",
                "Message ID: 1",
                "Action: list",
            ],
            b"",
        ))
        .unwrap();

    let reply = chan.read_message(&mut client).unwrap();
    assert_eq!(reply.payload, b"keyboard\n");

    drop(client);
    assert!(pump.join().unwrap().is_err());
}

#[test]
fn test_suspend_resume_across_pumps() {
    // First life: boot, accept one registration, stop for re-exec.
    let (service_end, mut client) = UnixStream::pair().unwrap();
    let flags = std::sync::Arc::new(ControlFlags::new());

    let pump = thread::spawn({
        let flags = std::sync::Arc::clone(&flags);
        move || {
            let mut service = RegistryService::new();
            let mut transport = SocketTransport {
                stream: service_end,
            };
            let outcome = service.run(&mut transport, &flags)?;
            Ok::<_, Error>((service, outcome))
        }
    });

    let mut chan = MessageChannel::new();
    chan.read_message(&mut client).unwrap();
    chan.read_message(&mut client).unwrap();
    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 5:1",
                "Message ID: 0",
                "Action: add",
                "Length: 6",
            ],
            b"paint\n",
        ))
        .unwrap();
    // A list round-trip proves the registration was dispatched before we
    // ask for the re-exec.
    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 7:2",
                "Message ID: 1",
                "Action: list",
            ],
            b"",
        ))
        .unwrap();
    assert_eq!(chan.read_message(&mut client).unwrap().payload, b"paint\n");

    // The flag is checked between messages, so raise it and then nudge the
    // pump past its blocking read with a harmless no-op message. (In
    // production a signal interrupts the read instead.)
    flags.request_reexec();
    client.write_all(&compose(&["Ping: 1"], b"")).unwrap();

    let (service, outcome) = pump.join().unwrap().unwrap();
    assert_eq!(outcome, Outcome::Reexec);
    let blob = service.suspend().unwrap();

    // Second life: resume from the blob on a fresh connection. No boot
    // broadcast this time, and the earlier registration is still there.
    let mut revived = RegistryService::resume(&blob).unwrap();
    let (service_end, mut client) = UnixStream::pair().unwrap();
    let pump = thread::spawn(move || {
        let mut transport = SocketTransport {
            stream: service_end,
        };
        let flags = ControlFlags::new();
        revived.run(&mut transport, &flags)
    });

    let mut chan = MessageChannel::new();
    client
        .write_all(&compose(
            &[
                "Command: register",
                "Client ID: 7:2",
                "Message ID: 9",
                "Action: list",
            ],
            b"",
        ))
        .unwrap();
    let reply = chan.read_message(&mut client).unwrap();
    assert_eq!(reply.payload, b"paint\n");

    drop(client);
    assert!(pump.join().unwrap().is_err());
}

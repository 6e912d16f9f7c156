use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    thread,
    time::{Duration, Instant},
};

use fic_client::{ClientError, FicClient};
use fic_protocol::{FicStatus, LoadMode, SelectMapWidth};
use fic_server::register::regs;
use fic_tests::{sim_board, spawn_server, test_builder};

/// Line level access for checking exact replies.
struct RawSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RawSession {
    fn connect(addr: SocketAddr) -> RawSession {
        let tcp = TcpStream::connect(addr).unwrap();
        tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut session = RawSession {
            reader: BufReader::new(tcp.try_clone().unwrap()),
            writer: tcp,
        };
        assert_eq!(session.line(), "OK\r\n");
        session
    }

    fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).unwrap();
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line
    }
}

#[test]
fn status_is_zero_until_first_refresh() {
    let sim = sim_board();
    sim.set_ack_enabled(false);
    let addr = spawn_server(sim.clone(), test_builder("status"));
    let mut client = FicClient::new(addr).unwrap();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(client.status().unwrap(), FicStatus::default());
    let mut session = RawSession::connect(addr);
    session.send("STAT\n");
    assert!(session.line().starts_with(r#"{"ts":"0001-01-01T00:00:00Z","#));

    sim.set_ack_enabled(true);
    let start = Instant::now();
    let status = loop {
        let status = client.status().unwrap();
        if status.is_fresh() {
            break status;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "status never refreshed");
        thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.state, 0x01);
    assert_eq!(status.dipsw, 0x05);
    assert_eq!(status.pwr, 1);
    assert!(status.ts > FicStatus::never_refreshed());
}

#[test]
fn stat_reply_is_json() {
    let sim = sim_board();
    let addr = spawn_server(sim, test_builder("stat-json"));
    let mut session = RawSession::connect(addr);
    session.send("STAT\r\n");
    let json = session.line();
    for field in ["ts", "state", "hls", "linkup", "dipsw", "led", "chup", "done", "pwr"] {
        assert!(json.contains(&format!("\"{field}\":")), "{field} missing in {json}");
    }
    assert!(json.ends_with("}\r\n"));
    assert_eq!(session.line(), "OK\r\n");
}

#[test]
fn register_write_then_read() {
    let sim = sim_board();
    let addr = spawn_server(sim.clone(), test_builder("registers"));
    let mut client = FicClient::new(addr).unwrap();

    client.write(regs::LED, 0xa5).unwrap();
    assert_eq!(sim.register(regs::LED), 0xa5);
    assert_eq!(client.read(regs::LED).unwrap(), 0xa5);
    assert_eq!(client.read(regs::DIPSW).unwrap(), 0x05);
}

#[test]
fn wire_format_of_register_commands() {
    let sim = sim_board();
    sim.set_register(0x0010, 0x0c);
    let addr = spawn_server(sim.clone(), test_builder("wire"));
    let mut session = RawSession::connect(addr);

    session.send("READ 10\n");
    assert_eq!(session.line(), "c\r\n");
    assert_eq!(session.line(), "OK\r\n");

    session.send("WRITE 11 7f\r\n");
    assert_eq!(session.line(), "OK\r\n");
    assert_eq!(sim.register(0x0011), 0x7f);
}

#[test]
fn malformed_commands_keep_the_session() {
    let sim = sim_board();
    let addr = spawn_server(sim.clone(), test_builder("malformed"));
    let mut session = RawSession::connect(addr);

    for line in [
        "WRITE zz 1\n",
        "WRITE 10\n",
        "READ\n",
        "READ 10000\n",
        "PROG abc\n",
        "PROG 0\n",
        "FOO\n",
        "\n",
    ] {
        session.send(line);
        assert_eq!(session.line(), "ERROR\r\n", "reply to {line:?}");
        assert_eq!(session.line(), "OK\r\n");
    }
    assert_eq!(sim.program_pulses(), 0);

    session.send("READ fffc\n");
    assert_eq!(session.line(), "5\r\n");
}

#[test]
fn help_lists_commands() {
    let addr = spawn_server(sim_board(), test_builder("help"));
    let mut client = FicClient::new(addr).unwrap();
    let help = client.help().unwrap();
    for command in ["STAT", "PROG8PR", "WRITE", "READ", "INIT"] {
        assert!(help.contains(command));
    }
}

#[test]
fn program_x16_bitstream() {
    let sim = sim_board();
    sim.set_done_after(600);
    let addr = spawn_server(sim.clone(), test_builder("program"));
    let mut client = FicClient::new(addr).unwrap();

    let bitstream: Vec<u8> = (0..1024u32).map(|i| (i * 13) as u8).collect();
    client
        .program(&bitstream, SelectMapWidth::X16, LoadMode::Reset)
        .unwrap();

    let words: Vec<u16> = bitstream
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(&sim.clocked()[..512], &words[..]);
    assert!(sim.done());
    assert_eq!(sim.program_pulses(), 1);
    assert_eq!(sim.output_mask(), 0);

    // The session continues after a load
    assert_eq!(client.read(regs::STATUS).unwrap(), 0x01);
}

#[test]
fn partial_reconfiguration_x8() {
    let sim = sim_board();
    let addr = spawn_server(sim.clone(), test_builder("partial"));
    let mut client = FicClient::new(addr).unwrap();

    let bitstream = b"partial bitstream".to_vec();
    client
        .program(&bitstream, SelectMapWidth::X8, LoadMode::PartialReconfig)
        .unwrap();
    let clocked: Vec<u8> = sim.clocked().iter().map(|word| *word as u8).collect();
    assert_eq!(clocked, bitstream);
    assert_eq!(sim.program_pulses(), 0);
}

#[test]
fn short_bitstream_body_is_rejected() {
    let sim = sim_board();
    sim.set_register(regs::LED, 0x42);
    let addr = spawn_server(sim.clone(), test_builder("short"));
    let mut session = RawSession::connect(addr);

    session.send("PROG 1024\n");
    assert_eq!(session.line(), "OK\r\n");
    assert_eq!(session.line(), "OK\r\n");
    session.writer.write_all(&[0x5a; 1000]).unwrap();
    session.writer.shutdown(Shutdown::Write).unwrap();

    assert_eq!(session.line(), "ERROR\r\n");
    let mut rest = String::new();
    session.reader.read_to_string(&mut rest).unwrap();
    assert!(rest.is_empty(), "session closed after a short body");

    assert!(sim.clocked().is_empty());
    assert_eq!(sim.program_pulses(), 0);
    assert_eq!(sim.register(regs::LED), 0x42);
}

#[test]
fn stalled_bitstream_body_times_out() {
    let sim = sim_board();
    let addr = spawn_server(
        sim.clone(),
        test_builder("stalled").body_timeout(Duration::from_millis(200)),
    );
    let mut session = RawSession::connect(addr);

    session.send("PROG8 1024\n");
    assert_eq!(session.line(), "OK\r\n");
    assert_eq!(session.line(), "OK\r\n");
    session.writer.write_all(&[0; 1000]).unwrap();
    assert_eq!(session.line(), "ERROR\r\n");
    assert!(sim.clocked().is_empty());
}

#[test]
fn configuration_error_is_reported() {
    let sim = sim_board();
    sim.fail_at_chunk(Some(3));
    let addr = spawn_server(sim.clone(), test_builder("init-drop"));
    let mut client = FicClient::new(addr).unwrap();

    let result = client.program(&[0u8; 64], SelectMapWidth::X16, LoadMode::Reset);
    assert!(matches!(result, Err(ClientError::Rejected("PROG"))));
    assert_eq!(sim.clocked().len(), 4);
    assert_eq!(sim.output_mask(), 0);

    // The connection outlives the failure
    client.write(0x0001, 0x02).unwrap();
}

#[test]
fn startup_failure_is_reported() {
    let sim = sim_board();
    sim.set_done_after(usize::MAX);
    sim.fail_at_chunk(Some(40));
    let addr = spawn_server(sim.clone(), test_builder("startup-drop"));
    let mut session = RawSession::connect(addr);

    session.send("PROG 64\n");
    assert_eq!(session.line(), "OK\r\n");
    assert_eq!(session.line(), "OK\r\n");
    session.writer.write_all(&[0x33; 64]).unwrap();
    assert_eq!(session.line(), "ERROR\r\n");
    assert_eq!(session.line(), "OK\r\n");
    assert_eq!(sim.clocked().len(), 41);
    assert!(!sim.done());
    assert_eq!(sim.output_mask(), 0);
}

#[test]
fn rejected_bitstreams() {
    let sim = sim_board();
    let addr = spawn_server(
        sim.clone(),
        test_builder("rejected").max_bitstream_size(4096),
    );
    let mut client = FicClient::new(addr).unwrap();

    let odd = client.program(&[1, 2, 3], SelectMapWidth::X16, LoadMode::Reset);
    assert!(matches!(odd, Err(ClientError::Rejected("PROG"))));
    let empty = client.program(&[], SelectMapWidth::X8, LoadMode::Reset);
    assert!(matches!(empty, Err(ClientError::Rejected("PROG8"))));
    let large = client.program(&[0; 8192], SelectMapWidth::X8, LoadMode::PartialReconfig);
    assert!(matches!(large, Err(ClientError::Rejected("PROG8PR"))));
    assert_eq!(sim.program_pulses(), 0);

    client.init().unwrap();
    assert_eq!(sim.program_pulses(), 1);
}

#[test]
fn hardware_timeout_is_an_error_reply() {
    let sim = sim_board();
    let addr = spawn_server(sim.clone(), test_builder("timeout"));
    let mut client = FicClient::new(addr).unwrap();

    sim.set_ack_enabled(false);
    assert!(matches!(client.read(0x0100), Err(ClientError::Rejected("READ"))));
    assert!(matches!(
        client.write(0x0100, 1),
        Err(ClientError::Rejected("WRITE"))
    ));

    sim.set_ack_enabled(true);
    client.write(0x0100, 1).unwrap();
    assert_eq!(client.read(0x0100).unwrap(), 1);
}

#[test]
fn concurrent_clients_are_serialized() {
    let sim = sim_board();
    let addr = spawn_server(sim.clone(), test_builder("concurrent"));

    let handles: Vec<_> = (0..4u16)
        .map(|client_id| {
            thread::spawn(move || {
                let mut client = FicClient::new(addr).unwrap();
                for round in 0..10u8 {
                    let addr = 0x0200 + client_id;
                    let value = round.wrapping_mul(17).wrapping_add(client_id as u8);
                    client.write(addr, value).unwrap();
                    assert_eq!(client.read(addr).unwrap(), value);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sim.output_mask(), 0);
}

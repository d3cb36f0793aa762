//! End-to-end server tests over the loopback interface, with a scripted
//! UDP client standing in for a booting board.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fatboot_common::types::{Endian, U16, U32};
use fatboot_fat::structures::raw::boot_sector::{RawBpb, RawEbpb};
use fatboot_fat::{FatFileSystem, FsOptions};
use fatboot_part::{Access, DiskImage};
use fatboot_tftp::server::{Handler, HandlerError};
use fatboot_tftp::{Board, BootHandler, ErrorCode, Mode, Packet, TftpServer, TransferSource};

/// Serves files straight out of a map; the simplest possible handler.
struct MapHandler(HashMap<String, Vec<u8>>);

impl Handler for MapHandler {
    fn resolve(
        &self,
        filename: &str,
        _client: SocketAddr,
    ) -> Result<TransferSource, HandlerError> {
        self.0
            .get(filename)
            .map(|data| TransferSource::Seekable(Box::new(Cursor::new(data.clone()))))
            .ok_or_else(|| HandlerError::NotFound(filename.into()))
    }
}

fn start<H: Handler>(handler: H) -> (Arc<TftpServer<H>>, SocketAddr) {
    let server = Arc::new(TftpServer::bind("127.0.0.1:0", handler).unwrap());
    let addr = server.local_addr().unwrap();
    let worker = Arc::clone(&server);
    thread::spawn(move || worker.serve_forever().unwrap());
    (server, addr)
}

struct Client {
    socket: UdpSocket,
}

impl Client {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self { socket }
    }

    fn send(&self, packet: &Packet, to: SocketAddr) {
        self.socket.send_to(&packet.to_bytes(), to).unwrap();
    }

    fn recv(&self) -> Option<(Packet, SocketAddr)> {
        let mut buf = [0u8; 65536 + 4];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => Some((Packet::parse(&buf[..len]).unwrap(), from)),
            Err(_) => None,
        }
    }

    fn rrq(&self, to: SocketAddr, filename: &str, options: &[(&str, &str)]) {
        self.send(
            &Packet::Rrq {
                filename: filename.into(),
                mode: Mode::Octet,
                options: options
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
            },
            to,
        );
    }
}

#[test]
fn test_small_transfer_with_blksize() {
    let content = b"console=serial0,115200 root=/dev/nbd0p2\n".to_vec();
    let (server, addr) = start(MapHandler(HashMap::from([(
        "cmdline.txt".to_string(),
        content.clone(),
    )])));

    let client = Client::new();
    client.rrq(addr, "cmdline.txt", &[("blksize", "128")]);

    let (oack, tid) = client.recv().expect("OACK");
    assert_ne!(tid.port(), addr.port(), "reply must come from a fresh TID");
    assert_eq!(
        oack,
        Packet::Oack {
            options: vec![("blksize".into(), "128".into())],
        }
    );

    client.send(&Packet::Ack { block: 0 }, tid);
    let (data, from) = client.recv().expect("DATA 1");
    assert_eq!(from, tid);
    assert_eq!(
        data,
        Packet::Data {
            block: 1,
            data: content.clone(),
        }
    );
    client.send(&Packet::Ack { block: 1 }, tid);

    // The transfer is finished (content < 128 bytes); at most one
    // retransmit can race the final ACK, then silence
    if client.recv().is_some() {
        assert!(client.recv().is_none());
    }
    server.shutdown();
}

#[test]
fn test_lockstep_multi_block() {
    let content: Vec<u8> = (0..1300u32).map(|i| i as u8).collect();
    let (server, addr) = start(MapHandler(HashMap::from([(
        "kernel.img".to_string(),
        content.clone(),
    )])));

    let client = Client::new();
    client.rrq(addr, "kernel.img", &[]);

    // No options means no OACK: DATA(1) arrives immediately
    let mut received = Vec::new();
    let mut expected_block = 1u16;
    let (first, tid) = client.recv().expect("DATA 1");
    let mut packet = first;
    loop {
        let Packet::Data { block, data } = packet else {
            panic!("expected DATA, got {packet:?}");
        };
        assert_eq!(block, expected_block);
        let last = data.len() < 512;
        received.extend_from_slice(&data);
        client.send(&Packet::Ack { block }, tid);
        if last {
            break;
        }
        expected_block += 1;
        packet = client.recv().expect("next DATA").0;
    }
    assert_eq!(expected_block, 3);
    assert_eq!(received, content);
    server.shutdown();
}

#[test]
fn test_tsize_and_timeout_negotiation() {
    let content = vec![9u8; 700];
    let (server, addr) = start(MapHandler(HashMap::from([(
        "initrd".to_string(),
        content.clone(),
    )])));

    let client = Client::new();
    client.rrq(addr, "initrd", &[("tsize", "0"), ("timeout", "1")]);
    let (oack, _tid) = client.recv().expect("OACK");
    assert_eq!(
        oack,
        Packet::Oack {
            options: vec![
                ("tsize".into(), "700".into()),
                ("timeout".into(), "1".into()),
            ],
        }
    );
    server.shutdown();
}

#[test]
fn test_not_found_from_main_port() {
    let (server, addr) = start(MapHandler(HashMap::new()));
    let client = Client::new();

    client.rrq(addr, "missing", &[]);
    let (packet, from) = client.recv().expect("ERROR");
    assert_eq!(from, addr, "pre-transfer errors come from the main port");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::NotFound,
            ..
        }
    ));
    server.shutdown();
}

#[test]
fn test_silly_blksize_rejected() {
    let (server, addr) = start(MapHandler(HashMap::from([(
        "f".to_string(),
        vec![0u8; 64],
    )])));
    let client = Client::new();
    client.rrq(addr, "f", &[("blksize", "4")]);
    let (packet, _) = client.recv().expect("ERROR");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::InvalidOpt,
            ..
        }
    ));
    server.shutdown();
}

#[test]
fn test_retransmit_then_give_up() {
    let content = vec![3u8; 64];
    let (server, addr) = start(MapHandler(HashMap::from([(
        "cmdline.txt".to_string(),
        content.clone(),
    )])));

    let client = Client::new();
    client.rrq(addr, "cmdline.txt", &[("utimeout", "100000")]);
    let (oack, tid) = client.recv().expect("OACK");
    assert_eq!(
        oack,
        Packet::Oack {
            options: vec![("utimeout".into(), "100000".into())],
        }
    );
    client.send(&Packet::Ack { block: 0 }, tid);

    // Never acknowledge DATA(1); the server must re-send it on the
    // 100 ms timer and abandon the transfer after ~5 timeouts
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut data_packets = 0;
    while Instant::now() < deadline {
        if let Some((Packet::Data { block: 1, .. }, from)) = client.recv() {
            assert_eq!(from, tid);
            data_packets += 1;
        }
    }
    assert!(
        (4..=10).contains(&data_packets),
        "expected a handful of re-sends, saw {data_packets}"
    );
    server.shutdown();
}

#[test]
fn test_foreign_tid_ignored() {
    let content: Vec<u8> = (0..32u8).collect();
    let (server, addr) = start(MapHandler(HashMap::from([(
        "boot.cfg".to_string(),
        content.clone(),
    )])));

    let client_a = Client::new();
    client_a.rrq(addr, "boot.cfg", &[("blksize", "8")]);
    let (_oack, tid) = client_a.recv().expect("OACK");
    client_a.send(&Packet::Ack { block: 0 }, tid);
    let (data1, _) = client_a.recv().expect("DATA 1");
    assert_eq!(
        data1,
        Packet::Data {
            block: 1,
            data: content[..8].to_vec(),
        }
    );

    // A hijacker ACKs from a different port; the server must ignore it
    let client_b = Client::new();
    client_b.send(&Packet::Ack { block: 1 }, tid);
    thread::sleep(Duration::from_millis(100));

    // A's own ACK still advances the transfer to block 2, proving B
    // moved nothing
    client_a.send(&Packet::Ack { block: 1 }, tid);
    let (data2, _) = client_a.recv().expect("DATA 2");
    assert_eq!(
        data2,
        Packet::Data {
            block: 2,
            data: content[8..16].to_vec(),
        }
    );
    server.shutdown();
}

// ---------------------------------------------------------------------
// End-to-end: a board serial resolving into a FAT partition of an image

const SS: usize = 512;

/// A bootable-looking image: an MBR with one FAT16 partition at LBA
/// 2048, formatted empty.
fn boot_image() -> Vec<u8> {
    let part_start = 2048usize;
    let part_sectors = 20480usize;
    let mut mem = vec![0u8; (part_start + part_sectors) * SS];

    // The MBR: partition 1, type 0x06, LBA 2048
    let entry_offset = 446;
    mem[entry_offset + 4] = 0x06;
    mem[entry_offset + 8..entry_offset + 12]
        .copy_from_slice(&(part_start as u32).to_le_bytes());
    mem[entry_offset + 12..entry_offset + 16]
        .copy_from_slice(&(part_sectors as u32).to_le_bytes());
    mem[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());

    // The FAT16 boot sector
    let base = part_start * SS;
    let mut bpb: RawBpb = bytemuck::Zeroable::zeroed();
    bpb.jump = [0xEB, 0x58, 0x90];
    bpb.oem_name = *b"fatboot ";
    bpb.bytes_per_sector = U16::new(SS as u16);
    bpb.sectors_per_cluster = 1;
    bpb.reserved_sectors = U16::new(1);
    bpb.fat_count = 2;
    bpb.max_root_entries = U16::new(512);
    bpb.fat16_total_sectors = U16::new(part_sectors as u16);
    bpb.media_descriptor = 0xF8;
    bpb.sectors_per_fat = U16::new(80);
    let mut ebpb: RawEbpb = bytemuck::Zeroable::zeroed();
    ebpb.extended_boot_sig = 0x29;
    ebpb.volume_id = U32::new(0xB007_B007);
    ebpb.volume_label = *b"BOOT       ";
    ebpb.file_system = *b"FAT16   ";
    mem[base..base + RawBpb::SIZE].copy_from_slice(bytemuck::bytes_of(&bpb));
    mem[base + RawBpb::SIZE..base + RawBpb::SIZE + RawEbpb::SIZE]
        .copy_from_slice(bytemuck::bytes_of(&ebpb));
    mem[base + 510..base + 512].copy_from_slice(&0xAA55u16.to_le_bytes());

    // Media and end-of-chain marks in both FAT copies
    for copy in 0..2 {
        let fat = base + SS + copy * 80 * SS;
        mem[fat..fat + 2].copy_from_slice(&0xFFF8u16.to_le_bytes());
        mem[fat + 2..fat + 4].copy_from_slice(&0xFFFFu16.to_le_bytes());
    }
    mem
}

#[test]
fn test_boot_handler_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&boot_image()).unwrap();
    file.flush().unwrap();

    // Populate the boot partition through the FAT engine
    let cmdline = b"console=serial0,115200 root=/dev/mmcblk0p2 rootwait\n";
    {
        let img = DiskImage::open(file.path(), Access::ReadWrite).unwrap();
        let partition = img.partitions().unwrap().get(1).unwrap().clone();
        let fs = FatFileSystem::with_options(&partition, FsOptions::default()).unwrap();
        fs.root()
            .join("cmdline.txt")
            .write_bytes(cmdline)
            .unwrap();
        fs.root().join("overlays").mkdir(false, false).unwrap();
    }

    let board = Board::from_spec(&format!("1234abcd,{}", file.path().display())).unwrap();
    let (server, addr) = start(BootHandler::new([board]));
    let client = Client::new();

    // The requested path leads with the board's hex serial
    client.rrq(addr, "1234abcd/cmdline.txt", &[("tsize", "0")]);
    let (oack, tid) = client.recv().expect("OACK");
    assert_eq!(
        oack,
        Packet::Oack {
            options: vec![("tsize".into(), cmdline.len().to_string())],
        }
    );
    client.send(&Packet::Ack { block: 0 }, tid);
    let (data, _) = client.recv().expect("DATA 1");
    assert_eq!(
        data,
        Packet::Data {
            block: 1,
            data: cmdline.to_vec(),
        }
    );
    client.send(&Packet::Ack { block: 1 }, tid);

    // Unknown serials and unknown files both return NOT_FOUND
    client.rrq(addr, "deadbeef/cmdline.txt", &[]);
    let (packet, _) = client.recv().expect("ERROR");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::NotFound,
            ..
        }
    ));
    client.rrq(addr, "1234abcd/nosuchfile", &[]);
    let (packet, _) = client.recv().expect("ERROR");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    // A directory is served as an undefined error
    client.rrq(addr, "1234abcd/overlays", &[]);
    let (packet, _) = client.recv().expect("ERROR");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::Undefined,
            ..
        }
    ));
    server.shutdown();
}

#[test]
fn test_ip_allow_list() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&boot_image()).unwrap();
    file.flush().unwrap();
    {
        let img = DiskImage::open(file.path(), Access::ReadWrite).unwrap();
        let partition = img.partitions().unwrap().get(1).unwrap().clone();
        let fs = FatFileSystem::with_options(&partition, FsOptions::default()).unwrap();
        fs.root().join("config.txt").write_text("arm_64bit=1\n").unwrap();
    }

    // The allow-list names an address loopback clients do not have
    let board =
        Board::from_spec(&format!("cafe,{},1,192.0.2.1", file.path().display())).unwrap();
    let (server, addr) = start(BootHandler::new([board]));
    let client = Client::new();
    client.rrq(addr, "cafe/config.txt", &[]);
    let (packet, _) = client.recv().expect("ERROR");
    assert!(matches!(
        packet,
        Packet::Error {
            code: ErrorCode::NotAuth,
            ..
        }
    ));
    server.shutdown();
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end transport scenarios: metadata exchange, wrap-around,
//! backpressure, dead-peer detection, duplex echo, and zero-copy paths.
//!
//! Reader and writer run in one process (two threads where concurrency
//! matters); the protocol cannot tell the difference since all state lives
//! in the shared mapping.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use zerobuffer::{
    BufferConfig, BufferResources, DuplexChannelFactory, Frame, ProcessingMode, Reader,
    ServerOptions, Writer, ZeroBufferError,
};

fn unique_name(tag: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("zb_{tag}_{}_{ts}", std::process::id())
}

/// Read the free-byte counter of a live buffer through a second mapping.
fn free_bytes_of(name: &str) -> u64 {
    let resources = BufferResources::for_buffer(name).expect("resolve");
    let shm = zerobuffer::platform::SharedMemory::open(resources.shm_name()).expect("open");
    // SAFETY: the segment starts with an initialized Oieb.
    let oieb = unsafe { &*(shm.as_ptr().cast::<zerobuffer::Oieb>()) };
    oieb.free_bytes()
}

#[test]
fn simple_metadata_and_one_frame() {
    let name = unique_name("s1");
    let mut reader = Reader::create(&name, BufferConfig::new(4096, 10240)).expect("reader");
    let mut writer = Writer::connect(&name).expect("writer");

    writer.set_metadata(b"v=1").expect("metadata");
    writer.write_frame(&[0x46u8; 1024]).expect("write");

    assert!(reader.is_writer_connected(Duration::from_secs(1)));
    assert_eq!(reader.get_metadata(), b"v=1");

    let frame = reader
        .read_frame(Duration::from_secs(1))
        .expect("read")
        .expect("one frame");
    assert_eq!(frame.sequence(), 1);
    assert_eq!(frame.size(), 1024);
    assert!(frame.data().iter().all(|&b| b == 0x46));
}

#[test]
fn wrap_around_preserves_sequences() {
    let name = unique_name("s2");
    // Small ring: slot is 272 bytes, so the 8th write wraps.
    let mut reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("reader");
    let mut writer = Writer::connect(&name).expect("writer");

    for i in 0..20u8 {
        let mut data = vec![b'x'; 256];
        data[0] = i;
        writer.write_frame(&data).expect("write");

        let frame = reader
            .read_frame(Duration::from_secs(1))
            .expect("read")
            .expect("frame");
        assert_eq!(frame.sequence(), u64::from(i) + 1);
        assert_eq!(frame.size(), 256);
        assert_eq!(frame.data()[0], i);
        drop(frame);

        // Conservation: with every slot released, the whole ring is free
        // again - wrap slack included.
        assert_eq!(free_bytes_of(&name), 2048);
    }

    assert_eq!(writer.frames_written(), 20);
    assert_eq!(reader.frames_read(), 20);
    assert_eq!(writer.next_sequence(), 21);
    assert_eq!(reader.expected_sequence(), 21);
}

#[test]
fn backpressure_unblocks_within_one_release() {
    let name = unique_name("s3");
    let mut reader = Reader::create(&name, BufferConfig::new(256, 10240)).expect("reader");

    let (tx, rx) = mpsc::channel::<Instant>();
    let writer_name = name.clone();
    let writer_thread = thread::spawn(move || {
        let mut writer = Writer::connect(&writer_name).expect("writer");
        // Nine 1040-byte slots fill 9360 of 10240 bytes; the tenth write
        // has to wait for space.
        for _ in 0..10 {
            writer.write_frame(&[0xABu8; 1024]).expect("write");
        }
        tx.send(Instant::now()).expect("send completion");
    });

    // Give the writer time to fill the ring and block on the tenth frame.
    thread::sleep(Duration::from_millis(300));
    assert!(
        rx.try_recv().is_err(),
        "writer should be blocked on a full ring"
    );

    let frame = reader
        .read_frame(Duration::from_secs(1))
        .expect("read")
        .expect("frame");
    drop(frame); // release -> sem-r -> writer resumes
    let released_at = Instant::now();

    let completed_at = rx
        .recv_timeout(Duration::from_secs(1))
        .expect("writer completion");
    assert!(
        completed_at.duration_since(released_at) < Duration::from_millis(500),
        "blocked writer took too long after release"
    );

    writer_thread.join().expect("join writer");

    // Drain the remaining nine frames in order.
    for expected in 2..=10u64 {
        let frame = reader
            .read_frame(Duration::from_secs(1))
            .expect("read")
            .expect("frame");
        assert_eq!(frame.sequence(), expected);
    }
}

#[cfg(target_os = "linux")]
fn poke_pid_field(buffer_name: &str, offset: u64, pid: u64) {
    use std::io::{Seek, SeekFrom, Write as IoWrite};
    let path = format!("/dev/shm/{buffer_name}");
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open segment file");
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(&pid.to_le_bytes()).expect("write pid");
}

#[cfg(target_os = "linux")]
fn dead_pid() -> u64 {
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let pid = u64::from(child.id());
    child.wait().expect("wait");
    pid
}

#[test]
#[cfg(target_os = "linux")]
fn writer_death_is_detected() {
    const WRITER_PID_OFFSET: u64 = 80;

    let name = unique_name("s4");
    let mut reader = Reader::create(&name, BufferConfig::new(256, 10240)).expect("reader");

    let mut writer = Writer::connect(&name).expect("writer");
    writer.write_frame(b"last words").expect("write");
    // Simulate a crash: the writer vanishes without clearing its pid.
    std::mem::forget(writer);
    poke_pid_field(&name, WRITER_PID_OFFSET, dead_pid());

    // The buffered frame is still readable.
    let frame = reader
        .read_frame(Duration::from_secs(1))
        .expect("read")
        .expect("frame");
    assert_eq!(frame.data(), b"last words");
    drop(frame);

    // The next blocking read times out against a dead writer.
    let result = reader.read_frame(Duration::from_secs(1));
    assert!(matches!(result, Err(ZeroBufferError::WriterDead)));
}

#[test]
#[cfg(target_os = "linux")]
fn reader_death_is_detected() {
    const READER_PID_OFFSET: u64 = 88;

    let name = unique_name("s4r");
    let reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("reader");
    let mut writer = Writer::connect(&name).expect("writer");

    poke_pid_field(&name, READER_PID_OFFSET, dead_pid());
    std::mem::forget(reader); // crashed reader never cleans up

    let result = writer.write_frame(&[1u8; 64]);
    assert!(matches!(result, Err(ZeroBufferError::ReaderDead)));

    // Leaked on purpose above; reclaim the debris.
    BufferResources::for_buffer(&name).expect("resolve").unlink_all();
}

#[test]
fn duplex_echo_reversed() {
    let channel = unique_name("s5");
    let factory = DuplexChannelFactory::new();

    let mut server = factory
        .create_immutable_server_with(
            &channel,
            BufferConfig::new(4096, 1 << 20),
            ServerOptions {
                timeout: Duration::from_millis(200),
            },
        )
        .expect("server");
    server
        .start(
            |frame: &Frame<'_>| frame.data().iter().rev().copied().collect(),
            ProcessingMode::SingleThread,
        )
        .expect("start");

    let mut client = factory.create_client(&channel).expect("client");

    let s1 = client.send_request(b"hello").expect("send hello");
    let s2 = client.send_request(b"world").expect("send world");
    assert_eq!(s2, s1 + 1);

    {
        let resp = client
            .receive_response(Duration::from_secs(5))
            .expect("recv")
            .expect("first response");
        assert_eq!(resp.sequence(), s1);
        assert_eq!(resp.data(), b"olleh");
    }
    {
        let resp = client
            .receive_response(Duration::from_secs(5))
            .expect("recv")
            .expect("second response");
        assert_eq!(resp.sequence(), s2);
        assert_eq!(resp.data(), b"dlrow");
    }

    assert!(client.is_server_connected());
    client.close();
    server.stop();
}

#[test]
fn duplex_mutable_transforms_in_place() {
    let channel = unique_name("s5m");
    let factory = DuplexChannelFactory::new();

    let mut server = factory
        .create_mutable_server_with(
            &channel,
            BufferConfig::new(4096, 1 << 20),
            ServerOptions {
                timeout: Duration::from_millis(200),
            },
        )
        .expect("server");
    server
        .start(
            |_seq: u64, data: &mut [u8]| {
                for byte in data.iter_mut() {
                    *byte = byte.to_ascii_uppercase();
                }
            },
            ProcessingMode::SingleThread,
        )
        .expect("start");

    let mut client = factory.create_client(&channel).expect("client");
    let seq = client.send_request(b"shout this").expect("send");

    let resp = client
        .receive_response(Duration::from_secs(5))
        .expect("recv")
        .expect("response");
    assert_eq!(resp.sequence(), seq);
    assert_eq!(resp.data(), b"SHOUT THIS");
    resp.release();

    client.close();
    server.stop();
}

#[test]
fn duplex_on_init_runs_before_first_handler_call() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let channel = unique_name("s5i");
    let factory = DuplexChannelFactory::new();

    let init_seen = Arc::new(AtomicBool::new(false));
    let ordering_ok = Arc::new(AtomicBool::new(false));

    let mut server = factory
        .create_immutable_server_with(
            &channel,
            BufferConfig::new(4096, 1 << 20),
            ServerOptions {
                timeout: Duration::from_millis(200),
            },
        )
        .expect("server");

    let handler_init = Arc::clone(&init_seen);
    let handler_order = Arc::clone(&ordering_ok);
    let init_flag = Arc::clone(&init_seen);
    server
        .start_with_init(
            move |frame: &Frame<'_>| {
                handler_order.store(handler_init.load(Ordering::SeqCst), Ordering::SeqCst);
                frame.data().to_vec()
            },
            ProcessingMode::SingleThread,
            move |_metadata: &[u8]| {
                init_flag.store(true, Ordering::SeqCst);
            },
        )
        .expect("start");

    let mut client = factory.create_client(&channel).expect("client");
    client.send_request(b"ping").expect("send");

    let resp = client
        .receive_response(Duration::from_secs(5))
        .expect("recv")
        .expect("response");
    assert_eq!(resp.data(), b"ping");
    drop(resp);

    assert!(init_seen.load(Ordering::SeqCst));
    assert!(ordering_ok.load(Ordering::SeqCst), "on_init ran after handler");

    client.close();
    server.stop();
}

#[test]
#[cfg(target_os = "linux")]
fn duplex_dead_client_raises_error_event() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WRITER_PID_OFFSET: u64 = 80;

    let channel = unique_name("s5e");
    let factory = DuplexChannelFactory::new();

    let mut server = factory
        .create_immutable_server_with(
            &channel,
            BufferConfig::new(4096, 1 << 20),
            ServerOptions {
                timeout: Duration::from_millis(200),
            },
        )
        .expect("server");

    let dead_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dead_events);
    server.add_error_handler(move |e| {
        if matches!(e, ZeroBufferError::WriterDead) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    server
        .start(
            |frame: &Frame<'_>| frame.data().to_vec(),
            ProcessingMode::SingleThread,
        )
        .expect("start");

    let mut client = factory.create_client(&channel).expect("client");
    client.send_request(b"hi").expect("send");
    let resp = client
        .receive_response(Duration::from_secs(5))
        .expect("recv")
        .expect("response");
    drop(resp);

    // Client process "crashes": request-writer pid goes stale.
    poke_pid_field(&format!("{channel}_request"), WRITER_PID_OFFSET, dead_pid());
    std::mem::forget(client);

    // The server's next read timeout probes liveness and reports the death.
    let deadline = Instant::now() + Duration::from_secs(3);
    while dead_events.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(dead_events.load(Ordering::SeqCst), 1);

    server.stop();

    // The forgotten client leaked its buffers; reclaim them.
    BufferResources::for_buffer(&format!("{channel}_response"))
        .expect("resolve")
        .unlink_all();
}

#[test]
fn zero_copy_pattern_roundtrip() {
    let name = unique_name("s6");
    let mut reader = Reader::create(&name, BufferConfig::new(256, 64 * 1024)).expect("reader");
    let mut writer = Writer::connect(&name).expect("writer");

    let buffer = writer.get_frame_buffer(4096).expect("reserve");
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = (i % 256) as u8;
    }
    writer.commit_frame().expect("commit");

    let frame = reader
        .read_frame(Duration::from_secs(1))
        .expect("read")
        .expect("frame");
    assert_eq!(frame.sequence(), 1);
    assert_eq!(frame.size(), 4096);
    for (i, byte) in frame.data().iter().enumerate() {
        assert_eq!(*byte, (i % 256) as u8, "pattern mismatch at offset {i}");
    }
}

#[test]
fn duplex_zero_copy_request() {
    let channel = unique_name("s6d");
    let factory = DuplexChannelFactory::new();

    let mut server = factory
        .create_immutable_server_with(
            &channel,
            BufferConfig::new(4096, 1 << 20),
            ServerOptions {
                timeout: Duration::from_millis(200),
            },
        )
        .expect("server");
    server
        .start(
            |frame: &Frame<'_>| frame.data().to_vec(),
            ProcessingMode::SingleThread,
        )
        .expect("start");

    let mut client = factory.create_client(&channel).expect("client");

    let (seq, buffer) = client.acquire_request_buffer(512).expect("acquire");
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    // Second acquisition before commit is a protocol violation.
    assert!(matches!(
        client.acquire_request_buffer(16),
        Err(ZeroBufferError::InvalidState(_))
    ));
    client.commit_request().expect("commit");

    let resp = client
        .receive_response(Duration::from_secs(5))
        .expect("recv")
        .expect("response");
    assert_eq!(resp.sequence(), seq);
    assert_eq!(resp.data().len(), 512);
    for (i, byte) in resp.data().iter().enumerate() {
        assert_eq!(*byte, (i % 251) as u8);
    }
    drop(resp);

    client.close();
    server.stop();
}

#[test]
fn concurrent_fifo_with_random_sizes() {
    let name = unique_name("fifo");
    let mut reader = Reader::create(&name, BufferConfig::new(256, 4096)).expect("reader");

    // Frame sizes chosen so the stream wraps many times in a 4 KiB ring.
    let mut rng = fastrand::Rng::with_seed(0x5EED);
    let sizes: Vec<usize> = (0..200).map(|_| rng.usize(1..700)).collect();

    let writer_sizes = sizes.clone();
    let writer_name = name.clone();
    let writer_thread = thread::spawn(move || {
        let mut writer = Writer::connect(&writer_name).expect("writer");
        for (k, size) in writer_sizes.iter().enumerate() {
            let fill = (k % 251) as u8;
            writer.write_frame(&vec![fill; *size]).expect("write");
        }
    });

    for (k, size) in sizes.iter().enumerate() {
        let frame = reader
            .read_frame(Duration::from_secs(5))
            .expect("read")
            .expect("frame");
        assert_eq!(frame.sequence(), k as u64 + 1);
        assert_eq!(frame.size(), *size, "size mismatch at frame {k}");
        let fill = (k % 251) as u8;
        assert!(
            frame.data().iter().all(|&b| b == fill),
            "payload mismatch at frame {k}"
        );
    }

    writer_thread.join().expect("join writer");
    assert_eq!(reader.frames_read(), 200);
}

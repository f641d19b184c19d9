/*!
 * Pipe Tests
 * Blocking byte-pipe semantics: ordering, wraparound, end-of-stream, and
 * short writes when the read side goes away.
 */

use nanokern::core::limits::PIPE_CAPACITY;
use nanokern::Kernel;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_pipe_roundtrip() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let n = k.write(w, b"hello kernel").unwrap();
            assert_eq!(n, 12);
            let mut buf = [0u8; 12];
            let n = k.read(r, &mut buf).unwrap();
            assert_eq!(n, 12);
            assert_eq!(&buf, b"hello kernel");
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_pipe_wraparound_transfer() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let data: Vec<u8> = (0..4 * PIPE_CAPACITY).map(|i| (i % 251) as u8).collect();
            let len = data.len();
            let child = k
                .exec(
                    move |k, _| {
                        let n = k.write(w, &data).unwrap();
                        assert_eq!(n, data.len());
                        0
                    },
                    &[],
                )
                .unwrap();
            let mut got = vec![0u8; len];
            for chunk in got.chunks_mut(4096) {
                let n = k.read(r, chunk).unwrap();
                assert_eq!(n, chunk.len());
            }
            let expected: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(got, expected);
            let (_, st) = k.wait_child(Some(child)).unwrap();
            assert_eq!(st, 0);
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_pipe_eof_after_writer_close() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let child = k
                .exec(
                    move |k, _| {
                        let n = k.write(w, b"ping").unwrap();
                        n as i32
                        // the child's descriptors are released on exit
                    },
                    &[],
                )
                .unwrap();
            // drop the local write reference so the child's exit closes
            // the write side for good
            k.close(w).unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(k.read(r, &mut buf).unwrap(), 4);
            assert_eq!(&buf, b"ping");
            let (_, st) = k.wait_child(Some(child)).unwrap();
            assert_eq!(st, 4);
            // end-of-stream is sticky and never an error
            assert_eq!(k.read(r, &mut buf).unwrap(), 0);
            assert_eq!(k.read(r, &mut buf).unwrap(), 0);
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_pipe_short_write_on_reader_close() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let t = k
                .create_thread(
                    move |k, _| {
                        let data = vec![7u8; PIPE_CAPACITY + 1000];
                        let n = k.write(w, &data).unwrap();
                        assert!(n < data.len());
                        n as i32
                    },
                    &[],
                )
                .unwrap();
            // let the writer fill the buffer and block
            std::thread::sleep(Duration::from_millis(50));
            k.close(r).unwrap();
            let n = k.join_thread(t).unwrap();
            assert!(n as usize <= PIPE_CAPACITY);
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_pipe_byte_stream_fidelity(data in proptest::collection::vec(any::<u8>(), 0..40_000)) {
        let expected = data.clone();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let status = Kernel::boot(
            move |k, _| {
                let (r, w) = k.create_pipe().unwrap();
                let payload = data.clone();
                k.create_thread(
                    move |k, _| {
                        let n = k.write(w, &payload).unwrap();
                        n as i32
                    },
                    &[],
                )
                .unwrap();
                let mut got = vec![0u8; data.len()];
                let n = k.read(r, &mut got).unwrap();
                assert_eq!(n, data.len());
                sink.lock().extend_from_slice(&got);
                0
            },
            &[],
        )
        .unwrap();
        prop_assert_eq!(status, 0);
        prop_assert_eq!(&*received.lock(), &expected);
    }
}

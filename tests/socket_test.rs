/*!
 * Socket Tests
 * Listener lifecycle, the connect/accept handshake, duplex traffic over
 * the wired pipe pair, shutdown halves, and connect timeouts.
 */

use nanokern::{Kernel, KernelError, ShutdownMode};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

#[test]
fn test_listen_rejects_bad_ports_and_duplicates() {
    let status = Kernel::boot(
        |k, _| {
            assert!(matches!(
                k.create_socket(40_000),
                Err(KernelError::InvalidArgument(_))
            ));
            let a = k.create_socket(80).unwrap();
            k.listen(a).unwrap();
            let b = k.create_socket(80).unwrap();
            assert!(matches!(k.listen(b), Err(KernelError::IllegalState(_))));
            // a socket without a port can connect but never listen
            let c = k.create_socket(0).unwrap();
            assert!(matches!(k.listen(c), Err(KernelError::IllegalState(_))));
            // listen is also not re-entrant on the same socket
            assert!(k.listen(a).is_err());
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_connect_without_listener_fails() {
    let status = Kernel::boot(
        |k, _| {
            let s = k.create_socket(0).unwrap();
            assert!(matches!(
                k.connect(s, 99, None),
                Err(KernelError::IllegalState(_))
            ));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_connect_timeout() {
    let status = Kernel::boot(
        |k, _| {
            let l = k.create_socket(300).unwrap();
            k.listen(l).unwrap();
            let s = k.create_socket(0).unwrap();
            let start = Instant::now();
            let err = k
                .connect(s, 300, Some(Duration::from_millis(50)))
                .unwrap_err();
            assert!(matches!(err, KernelError::Timeout(_)));
            assert!(start.elapsed() >= Duration::from_millis(50));
            assert!(start.elapsed() < Duration::from_secs(5));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_handshake_duplex_channel() {
    let status = Kernel::boot(
        |k, _| {
            let l = k.create_socket(100).unwrap();
            k.listen(l).unwrap();
            let client = k
                .create_thread(
                    |k, _| {
                        let s = k.create_socket(0).unwrap();
                        k.connect(s, 100, None).unwrap();
                        assert_eq!(k.write(s, b"ping").unwrap(), 4);
                        let mut buf = [0u8; 4];
                        assert_eq!(k.read(s, &mut buf).unwrap(), 4);
                        assert_eq!(&buf, b"pong");
                        0
                    },
                    &[],
                )
                .unwrap();
            let peer = k.accept(l).unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(k.read(peer, &mut buf).unwrap(), 4);
            assert_eq!(&buf, b"ping");
            assert_eq!(k.write(peer, b"pong").unwrap(), 4);
            assert_eq!(k.join_thread(client).unwrap(), 0);
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_shutdown_write_gives_peer_eof() {
    let status = Kernel::boot(
        |k, _| {
            let l = k.create_socket(200).unwrap();
            k.listen(l).unwrap();
            let client = k
                .create_thread(
                    |k, _| {
                        let s = k.create_socket(0).unwrap();
                        k.connect(s, 200, None).unwrap();
                        let mut buf = [0u8; 8];
                        // the server shut its write half; this is EOF
                        assert_eq!(k.read(s, &mut buf).unwrap(), 0);
                        // shutting our own read half makes reads fail hard
                        k.shutdown(s, ShutdownMode::Read).unwrap();
                        assert!(matches!(
                            k.read(s, &mut buf),
                            Err(KernelError::BrokenChannel)
                        ));
                        0
                    },
                    &[],
                )
                .unwrap();
            let peer = k.accept(l).unwrap();
            k.shutdown(peer, ShutdownMode::Write).unwrap();
            assert!(matches!(
                k.write(peer, b"nope"),
                Err(KernelError::BrokenChannel)
            ));
            // re-closing an already-shut half is a quiet no-op
            k.shutdown(peer, ShutdownMode::Write).unwrap();
            assert_eq!(k.join_thread(client).unwrap(), 0);
            k.shutdown(peer, ShutdownMode::Both).unwrap();
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_shutdown_requires_peer() {
    let status = Kernel::boot(
        |k, _| {
            let s = k.create_socket(0).unwrap();
            assert!(matches!(
                k.shutdown(s, ShutdownMode::Both),
                Err(KernelError::IllegalState(_))
            ));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_listener_close_unblocks_acceptors() {
    let status = Kernel::boot(
        |k, _| {
            let l = k.create_socket(400).unwrap();
            k.listen(l).unwrap();
            let acceptor = k
                .create_thread(
                    move |k, _| match k.accept(l) {
                        Err(KernelError::IllegalState(_)) => 1,
                        _ => 0,
                    },
                    &[],
                )
                .unwrap();
            // let the acceptor block on the empty queue
            std::thread::sleep(Duration::from_millis(50));
            k.close(l).unwrap();
            assert_eq!(k.join_thread(acceptor).unwrap(), 1);
            // the port is vacated and can be claimed again
            let l2 = k.create_socket(400).unwrap();
            k.listen(l2).unwrap();
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

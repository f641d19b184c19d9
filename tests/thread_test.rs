/*!
 * Thread Layer Tests
 * join/detach/exit semantics and their interaction with process exit.
 */

use nanokern::{Kernel, KernelError};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn test_join_returns_exit_value() {
    let status = Kernel::boot(
        |k, _| {
            let t = k.create_thread(|k, _| k.thread_exit(5), &[]).unwrap();
            assert_eq!(k.join_thread(t).unwrap(), 5);
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_join_after_exit() {
    let status = Kernel::boot(
        |k, _| {
            let t = k.create_thread(|_, _| 9, &[]).unwrap();
            // give the thread time to finish before joining
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(k.join_thread(t).unwrap(), 9);
            // the record was reclaimed by the join
            assert!(matches!(
                k.join_thread(t),
                Err(KernelError::InvalidHandle(_))
            ));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_self_join_fails() {
    let status = Kernel::boot(
        |k, _| {
            let me = k.self_identity().unwrap();
            assert!(matches!(
                k.join_thread(me),
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
fn test_detach_fails_pending_join() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let target = k
                .create_thread(
                    move |k, _| {
                        let mut b = [0u8; 1];
                        k.read(r, &mut b).unwrap();
                        0
                    },
                    &[],
                )
                .unwrap();
            let joiner = k
                .create_thread(
                    move |k, _| match k.join_thread(target) {
                        Err(KernelError::IllegalState(_)) => 1,
                        _ => 0,
                    },
                    &[],
                )
                .unwrap();
            // let the joiner block on the still-running target
            std::thread::sleep(Duration::from_millis(50));
            k.detach_thread(target).unwrap();
            assert_eq!(k.join_thread(joiner).unwrap(), 1);
            // release the detached target
            k.write(w, b"x").unwrap();
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_detach_after_exit_reclaims() {
    let status = Kernel::boot(
        |k, _| {
            let t = k.create_thread(|_, _| 9, &[]).unwrap();
            // let the thread finish before detaching it
            std::thread::sleep(Duration::from_millis(50));
            k.detach_thread(t).unwrap();
            // the record was reclaimed by the detach
            assert!(matches!(
                k.join_thread(t),
                Err(KernelError::InvalidHandle(_))
            ));
            assert!(matches!(
                k.detach_thread(t),
                Err(KernelError::InvalidHandle(_))
            ));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_detach_unknown_thread() {
    let status = Kernel::boot(
        |k, _| {
            assert!(matches!(
                k.detach_thread(777),
                Err(KernelError::InvalidHandle(_))
            ));
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

#[test]
fn test_process_waits_for_last_thread() {
    let status = Kernel::boot(
        |k, _| {
            let (r, w) = k.create_pipe().unwrap();
            let child = k
                .exec(
                    move |k, _| {
                        k.create_thread(
                            move |k, _| {
                                std::thread::sleep(Duration::from_millis(50));
                                k.write(w, b"late").unwrap();
                                3
                            },
                            &[],
                        )
                        .unwrap();
                        // the main thread leaves first; the process must
                        // stay alive for its secondary thread
                        k.exit(0)
                    },
                    &[],
                )
                .unwrap();
            let (_, st) = k.wait_child(Some(child)).unwrap();
            assert_eq!(st, 0);
            // teardown ran after the late write, so the bytes are buffered
            let mut buf = [0u8; 4];
            assert_eq!(k.read(r, &mut buf).unwrap(), 4);
            assert_eq!(&buf, b"late");
            0
        },
        &[],
    )
    .unwrap();
    assert_eq!(status, 0);
}

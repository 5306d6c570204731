use super::*;
use std::thread;

#[test]
fn buffered_channel_is_fifo() {
    let chan = Chan::new(3);
    chan.send(1).unwrap();
    chan.send(2).unwrap();
    chan.send(3).unwrap();
    assert_eq!(chan.len(), 3);
    assert_eq!(chan.recv(), Some(1));
    assert_eq!(chan.recv(), Some(2));
    assert_eq!(chan.recv(), Some(3));
}

#[test]
fn closed_channel_drains_then_reports_closed() {
    let chan = Chan::new(2);
    chan.send("a").unwrap();
    chan.close().unwrap();
    assert_eq!(chan.recv(), Some("a"));
    assert_eq!(chan.recv(), None);
    assert_eq!(chan.recv(), None);
}

#[test]
fn send_and_close_after_close_fail() {
    let chan = Chan::new(1);
    chan.close().unwrap();
    assert_eq!(chan.send(5), Err(RuntimeError::SendOnClosed));
    assert_eq!(chan.close(), Err(RuntimeError::CloseOfClosed));
}

#[test]
fn unbuffered_send_waits_for_receiver() {
    let chan = Arc::new(Chan::new(0));
    let sender = {
        let chan = Arc::clone(&chan);
        thread::spawn(move || {
            for value in 0..5 {
                chan.send(value).unwrap();
            }
            chan.close().unwrap();
        })
    };
    let mut received = Vec::new();
    while let Some(value) = chan.recv() {
        received.push(value);
    }
    sender.join().unwrap();
    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    assert_eq!(chan.len(), 0);
}

#[test]
fn erased_handle_converts_scalar_values() {
    let chan = ChanValue::Int(Arc::new(Chan::new(1)));
    chan.send_value(Value::Int(42)).unwrap();
    assert!(matches!(chan.recv_value(), Some(Value::Int(42))));

    let err = chan.send_value(Value::Bool(true)).unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
}

#[test]
fn generic_handle_carries_any_value() {
    let chan = ChanValue::Generic(Arc::new(Chan::new(1)));
    chan.send_value(Value::Struct(vec![Value::Int(1), Value::Bool(true)]))
        .unwrap();
    match chan.recv_value() {
        Some(Value::Struct(fields)) => assert_eq!(fields.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(chan.clone(), chan);
}

#[test]
fn large_capacity_buffers_grow_on_demand() {
    let chan: Chan<i64> = Chan::new(usize::MAX);
    assert_eq!(chan.cap(), usize::MAX);
    chan.send(1).unwrap();
    chan.send(2).unwrap();
    assert_eq!(chan.len(), 2);
    assert_eq!(chan.recv(), Some(1));
}

mod common;

use common::{Mock, Rx, Tx};
use hydrabus::atr::{Anomaly, AtrOptions, ClockRate, Convention, UnknownTs};
use hydrabus::smartcard::Smartcard;
use hydrabus::{Error, Hydrabus, TransferFailure};

fn smartcard(mock: &Mock) -> Smartcard<Tx, Rx> {
    mock.binary_mode().bus_mode(0x0b, b"CRD1");
    let (tx, rx) = mock.split();
    Hydrabus::new(tx, rx)
        .to_bitbang()
        .and_then(|bb| bb.to_smartcard())
        .expect("failed to enter smartcard mode")
}

/// Scripts a read of `bytes` from the card, as they appear on the wire.
fn card_sends(mock: &Mock, bytes: &[u8]) {
    let n = (bytes.len() as u16).to_be_bytes();
    let mut reply = vec![0x01];
    reply.extend_from_slice(bytes);
    mock.expect(&[0x04, 0x00, 0x00, n[0], n[1]], &reply);
}

struct NoDelay;

impl embedded_hal::blocking::delay::DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, _ms: u16) {}
}

#[test]
fn warm_reset_sequence() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    mock.expect(&[0x03], &[0x01]);
    mock.expect(&[0x64], &[0x01]);
    // line noise while the card is held in reset
    mock.expect(&[0x02], &[0x01, 0x3b, 0x00]);
    mock.expect(&[0x03], &[0x01]);

    sc.warm_reset(&mut NoDelay).unwrap();
    assert!(mock.is_done());
    assert_eq!(mock.unread(), 0);
}

#[test]
fn read_atr_asks_for_what_the_structure_needs() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    card_sends(&mock, &[0x3b]);
    card_sends(&mock, &[0x92]);
    card_sends(&mock, &[0x96]);
    card_sends(&mock, &[0x00]);
    card_sends(&mock, b"HB");

    let atr = sc.read_atr(AtrOptions::default()).unwrap();
    assert!(atr.is_complete());
    assert_eq!(atr.raw(), &[0x3b, 0x92, 0x96, 0x00, b'H', b'B']);
    assert_eq!(atr.clock_rate().cycles_per_etu(), Some(16));
    assert_eq!(atr.historical(), b"HB");
    assert_eq!(atr.tck(), None);
    assert!(mock.is_done());
}

#[test]
fn read_atr_inverse_convention() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    let conv = Convention::Inverse;
    card_sends(&mock, &[0x03]);
    card_sends(&mock, &[conv.apply(0x01)]);
    card_sends(&mock, &[conv.apply(0x5a)]);

    let atr = sc.read_atr(AtrOptions::default()).unwrap();
    assert_eq!(atr.convention(), Convention::Inverse);
    assert_eq!(atr.historical(), &[0x5a]);
    assert_eq!(sc.convention(), Convention::Inverse);
    assert!(mock.is_done());
}

#[test]
fn read_atr_rejects_unknown_ts() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    card_sends(&mock, &[0x42]);

    let opts = AtrOptions {
        unknown_ts: UnknownTs::Reject,
        ..AtrOptions::default()
    };
    let atr = sc.read_atr(opts).unwrap();
    assert!(!atr.is_complete());
    assert_eq!(atr.anomalies(), &[Anomaly::NonStandardTs(0x42)]);
    assert!(mock.is_done());
}

#[test]
fn read_atr_card_silent() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    mock.expect(&[0x04, 0x00, 0x00, 0x00, 0x01], &[]);

    let err = sc.read_atr(AtrOptions::default()).err().unwrap();
    assert!(matches!(
        err,
        Error::Transfer {
            reason: TransferFailure::Timeout
        }
    ));
}

#[test]
fn pps_goes_through_the_convention() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    sc.set_convention(Convention::Inverse);
    let req = [0xffu8, 0x11, 0x96, 0x78];
    let wire: Vec<u8> = req.iter().map(|b| Convention::Inverse.apply(*b)).collect();

    mock.expect(&[0x04, 0x00, 0x04, 0x00, 0x04], &[]);
    let mut reply = vec![0x01];
    reply.extend_from_slice(&wire);
    mock.expect(&wire, &reply);

    let resp = sc.send_pps(1, ClockRate::from(0x96)).unwrap();
    assert_eq!(resp, req);
    assert!(mock.is_done());
}

#[test]
fn t1_information_field_limit() {
    let mock = Mock::new();
    let mut sc = smartcard(&mock);
    mock.clear_written();

    let err = sc.t1_exchange(0, 0, &[0u8; 255], &mut []).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    assert!(mock.written().is_empty());
}

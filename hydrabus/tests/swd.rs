mod common;

use common::{Mock, Rx, Tx};
use hydrabus::rawwire::RawWire;
use hydrabus::swd::Swd;
use hydrabus::{Error, Hydrabus, TransferFailure};

fn rawwire(mock: &Mock) -> RawWire<Tx, Rx> {
    mock.binary_mode()
        .bus_mode(0x05, b"RAW1")
        .expect(&[0b1000_1010], &[0x01]);
    let (tx, rx) = mock.split();
    Hydrabus::new(tx, rx)
        .to_bitbang()
        .and_then(|bb| bb.to_rawwire())
        .expect("failed to enter raw-wire mode")
}

fn swd(wire: &mut RawWire<Tx, Rx>) -> Swd<'_, Tx, Rx> {
    Swd::new(wire).expect("failed to configure SWD")
}

/// Scripts a request byte followed by the three ACK bits. Raw-wire bulk
/// writes answer with an ACK and then the byte sampled on SWDIO.
fn request(mock: &Mock, cmd: u8, ack: u8) {
    mock.expect(&[0x10, cmd], &[0x01, 0xff]);
    for i in 0..3 {
        mock.expect(&[0x07], &[(ack >> i) & 1]);
    }
}

fn sync(mock: &Mock) {
    mock.expect(&[0x10, 0x00], &[0x01, 0x00]);
}

#[test]
fn read_idcode() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire);
    request(&mock, 0xa5, 0b001);
    for b in [0x77u8, 0x14, 0xa0, 0x2b].iter() {
        mock.expect(&[0x06], &[*b]);
    }
    sync(&mock);

    assert_eq!(swd.read_dp(0x0).unwrap(), 0x2ba0_1477);
    assert!(mock.is_done());
    assert_eq!(mock.unread(), 0);
}

#[test]
fn write_select() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire);
    request(&mock, 0xb1, 0b001);
    mock.expect(&[0x21], &[0x01]);
    mock.expect(&[0x13, 0xf0, 0x00, 0x00, 0x01], &[0x01, 0xf0, 0x00, 0x00, 0x01]);
    // 0x010000f0 has five bits set
    mock.expect(&[0x10, 0x01], &[0x01, 0x01]);

    swd.write_dp(0x8, 0x0100_00f0).unwrap();
    assert!(mock.is_done());
}

#[test]
fn fault_is_unexpected_ack() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire);
    request(&mock, 0xa5, 0b100);
    sync(&mock);

    let err = swd.read_dp(0x0).err().unwrap();
    assert!(matches!(
        err,
        Error::Transfer {
            reason: TransferFailure::Unexpected(0b100)
        }
    ));
    assert!(mock.is_done());
}

#[test]
fn wait_is_aborted_and_bounded() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire).with_retries(1);
    request(&mock, 0xa5, 0b010);
    sync(&mock);
    // abort
    request(&mock, 0x81, 0b001);
    mock.expect(&[0x21], &[0x01]);
    mock.expect(&[0x13, 0x1f, 0x00, 0x00, 0x00], &[0x01, 0x1f, 0x00, 0x00, 0x00]);
    mock.expect(&[0x10, 0x01], &[0x01, 0x01]);

    let err = swd.read_dp(0x0).err().unwrap();
    assert!(matches!(err, Error::RetryExhausted { attempts: 1, .. }));
    assert!(mock.is_done());
}

#[test]
fn wait_then_ok() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire).with_retries(2);
    request(&mock, 0xbd, 0b010);
    sync(&mock);
    request(&mock, 0x81, 0b010);
    mock.expect(&[0x21], &[0x01]);
    sync(&mock);
    request(&mock, 0xbd, 0b001);
    for _ in 0..4 {
        mock.expect(&[0x06], &[0xff]);
    }
    sync(&mock);

    assert_eq!(swd.read_dp(0xc).unwrap(), 0xffff_ffff);
    assert!(mock.is_done());
}

#[test]
fn line_reset() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire);
    let mut token = vec![0x1e];
    token.extend_from_slice(&[
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7b, 0x9e, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x0f,
    ]);
    let mut reply = vec![0x01];
    reply.extend_from_slice(&[0xff; 15]);
    mock.expect(&token, &reply);
    sync(&mock);

    swd.bus_init().unwrap();
    assert!(mock.is_done());
    assert_eq!(mock.unread(), 0);
}

#[test]
fn power_up_request() {
    let mock = Mock::new();
    let mut wire = rawwire(&mock);
    let mut swd = swd(&mut wire);
    request(&mock, 0xa9, 0b001);
    mock.expect(&[0x21], &[0x01]);
    mock.expect(&[0x13, 0x00, 0x00, 0x00, 0x50], &[0x01, 0x00, 0x00, 0x00, 0x50]);
    mock.expect(&[0x10, 0x00], &[0x01, 0x00]);

    swd.power_up().unwrap();
    assert!(mock.is_done());
}

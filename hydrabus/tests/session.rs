mod common;

use common::{Mock, MockError, Rx, Tx};
use hydrabus::bitbang::BitBang;
use hydrabus::mode::BusMode;
use hydrabus::{spi, Error, Hydrabus, TransferFailure, BANNER_ATTEMPTS};

fn bitbang(mock: &Mock) -> BitBang<Tx, Rx> {
    mock.binary_mode();
    let (tx, rx) = mock.split();
    Hydrabus::new(tx, rx)
        .to_bitbang()
        .expect("failed to enter binary mode")
}

fn spi(mock: &Mock) -> spi::Spi<Tx, Rx> {
    let bb = bitbang(mock);
    mock.bus_mode(0x01, b"SPI1");
    bb.to_spi().expect("failed to enter SPI mode")
}

#[test]
fn binary_mode_drops_console_noise() {
    let mock = Mock::new();
    mock.preload(b"\r\nhydrabus> ");
    let bb = bitbang(&mock);
    assert_eq!(mock.written(), vec![0x00]);
    assert_eq!(mock.unread(), 0);

    mock.expect(&[0x0f, b'\n'], &[]);
    bb.close().expect("close failed");
    assert!(mock.is_done());
}

#[test]
fn binary_mode_gives_up_after_twenty_attempts() {
    let mock = Mock::new();
    for _ in 0..BANNER_ATTEMPTS {
        mock.expect(&[0x00], &[]);
    }
    let (tx, rx) = mock.split();
    let err = Hydrabus::new(tx, rx).to_bitbang().err().unwrap();
    assert!(matches!(err, Error::Protocol { .. }));
    assert!(err.is_session_retryable());
    assert_eq!(mock.written().len(), BANNER_ATTEMPTS as usize);
}

#[test]
fn binary_mode_banner_on_a_later_attempt() {
    let mock = Mock::new();
    mock.expect(&[0x00], &[]).expect(&[0x00], &[]).binary_mode();
    let (tx, rx) = mock.split();
    assert!(Hydrabus::new(tx, rx).to_bitbang().is_ok());
    assert!(mock.is_done());
}

#[test]
fn wrong_submode_banner_returns_to_console() {
    let mock = Mock::new();
    let bb = bitbang(&mock);
    mock.expect(&[0x01], b"I2C1");
    mock.expect(&[0x00, 0x0f, b'\n'], &[]);

    let err = bb.to_spi().err().unwrap();
    match err {
        Error::Protocol { stage } => assert_eq!(stage, "SPI mode"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(mock.is_done());
}

#[test]
fn configure_rejected() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0b1000_0001], &[0x00]);

    let err = spi.configure(&spi::Config::default()).err().unwrap();
    assert!(matches!(err, Error::Configuration { command: 0x81 }));
    assert!(err.requires_reset());
}

#[test]
fn configure_timeout_is_rejection() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0b1000_0010], &[]);

    let err = spi.configure(&spi::DEFAULT_CONFIG).err().unwrap();
    assert!(matches!(err, Error::Configuration { command: 0x82 }));
}

#[test]
fn write_then_read() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0x04, 0x00, 0x01, 0x00, 0x03], &[]);
    mock.expect(&[0x9f], &[0x01, 0xc2, 0x20, 0x18]);

    let mut id = [0u8; 3];
    spi.write_then_read(&[0x9f], &mut id, true).unwrap();
    assert_eq!(id, [0xc2, 0x20, 0x18]);
    assert!(mock.is_done());
}

#[test]
fn write_then_read_refused_before_payload() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.clear_written();
    mock.expect(&[0x05, 0x00, 0x02, 0x00, 0x04], &[0x00]);

    let mut resp = [0u8; 4];
    let err = spi.write_then_read(&[0xaa, 0xbb], &mut resp, false).err().unwrap();
    assert!(matches!(
        err,
        Error::Transfer {
            reason: TransferFailure::Nack
        }
    ));
    assert_eq!(mock.written(), vec![0x05, 0x00, 0x02, 0x00, 0x04]);
}

#[test]
fn write_then_read_missing_status() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0x04, 0x00, 0x01, 0x00, 0x00], &[]);
    mock.expect(&[0x06], &[0x42]);

    let err = spi.write_then_read(&[0x06], &mut [], true).err().unwrap();
    assert!(matches!(
        err,
        Error::Transfer {
            reason: TransferFailure::Unexpected(0x42)
        }
    ));
}

#[test]
fn write_then_read_length_limit() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.clear_written();

    let big = vec![0u8; 4097];
    let err = spi.write_then_read(&big, &mut [], true).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    let mut big = vec![0u8; 4097];
    let err = spi.write_then_read(&[], &mut big, true).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    assert!(mock.written().is_empty());
}

#[test]
fn bulk_length_limits() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.clear_written();

    let err = spi.bulk_transfer(&[], &mut []).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    let err = spi.bulk_transfer(&[0u8; 17], &mut [0u8; 17]).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    assert!(mock.written().is_empty());
}

#[test]
fn transfer_is_chunked() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    let data: Vec<u8> = (0..20).collect();
    let echo: Vec<u8> = data.iter().map(|b| !b).collect();

    mock.expect(&[0x1f], &[0x01]);
    mock.expect(&data[..16], &echo[..16]);
    mock.expect(&[0x13], &[0x01]);
    mock.expect(&data[16..], &echo[16..]);

    let mut words = data.clone();
    spi.transfer(&mut words).unwrap();
    assert_eq!(words, echo);
    assert!(mock.is_done());
}

#[test]
fn speed_checked_against_device() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.clear_written();

    // SPI1 is the device after entering the mode.
    let err = spi.set_speed(spi::Speed::Speed160KHz).err().unwrap();
    assert!(matches!(err, Error::Request { .. }));
    assert!(mock.written().is_empty());

    mock.expect(&[0b0110_0111], &[0x01]);
    spi.set_speed(spi::Speed::Speed42MHz).unwrap();
}

#[test]
fn identify_and_exit() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0x01], b"SPI1");
    assert_eq!(&spi.identify().unwrap(), b"SPI1");

    mock.binary_mode();
    mock.expect(&[0x0f, b'\n'], &[]);
    let hb = spi.close().unwrap();
    assert!(mock.is_done());
    let _ = hb.release();
}

#[test]
fn aux_pins() {
    let mock = Mock::new();
    let mut spi = spi(&mock);
    mock.expect(&[0xe0], &[0x0f]);
    mock.expect(&[0xc0], &[0x05]);
    mock.expect(&[0xd3], &[0x01]);

    let mut aux = spi.aux();
    let cfg = aux.config().unwrap();
    assert_eq!(cfg.inputs, 0x0f);
    assert_eq!(cfg.pullups, 0x00);
    assert_eq!(aux.values().unwrap(), 0x05);
    aux.set_values(0x03).unwrap();
    assert!(mock.is_done());
}

#[test]
fn root_utilities() {
    let mock = Mock::new();
    let mut bb = bitbang(&mock);
    mock.expect(&[0x14], &[0x01, 0x23]);
    mock.expect(&[0x16], &[0x40, 0x42, 0x0f, 0x00, 0x32, 0x00, 0x00, 0x00]);

    assert_eq!(bb.read_adc().unwrap(), 0x0123);
    let f = bb.frequency().unwrap();
    assert_eq!(f.hertz, 1_000_000);
    assert_eq!(f.duty_cycle, 50);
}

#[test]
fn serial_errors_are_passed_through() {
    let mock = Mock::new();
    let mut bb = bitbang(&mock);
    mock.trigger_write_error();
    match bb.read_adc() {
        Err(Error::Write { error }) => assert_eq!(error, MockError),
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }

    mock.expect(&[0x14], &[]);
    mock.trigger_read_error();
    match bb.read_adc() {
        Err(Error::Read { error }) => assert_eq!(error, MockError),
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }
}

//! Engine unit tests, driven through the test fixture.

use std::{
    num::NonZeroUsize,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    sync::Arc,
    time::{Duration, Instant},
};

use proptest::prelude::*;

use super::{hex_bytes, printable_bytes, Driver};
use crate::{
    error::{DriverError, LengthError, TimeoutKind},
    fixture::Fixture,
    listener::{BufferListener, IoListener},
    stream::{FdStream, TestStream},
};

const MAX_PACKET: usize = 100;

/// The reference classifier used throughout: packets are
/// `[0x00, a, b, 0x00]`, anything not starting with `0x00` is junk, and a
/// zero-led quadruplet without the trailing zero discards all four bytes.
fn zero_framed(buffer: &[u8]) -> i64 {
    if buffer[0] != 0 {
        return -1;
    }
    if buffer.len() < 4 {
        return 0;
    }
    if buffer[3] == 0 { 4 } else { -4 }
}

type Classifier = fn(&[u8]) -> i64;

fn fixture() -> Fixture<Classifier> {
    Fixture::new(
        NonZeroUsize::new(MAX_PACKET).expect("non-zero"),
        zero_framed as Classifier,
    )
}

fn fixture_extract_last() -> Fixture<Classifier> {
    Fixture::with_driver(
        Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), true),
        zero_framed as Classifier,
    )
}

/// `67 61 72 62 00 61 62 00 62 61 67 65 00 63 64 00`: two packets, each
/// behind four bytes of garbage.
const NOISY_BURST: [u8; 16] = [
    0x67, 0x61, 0x72, 0x62, 0x00, 0x61, 0x62, 0x00, 0x62, 0x61, 0x67, 0x65, 0x00, 0x63, 0x64,
    0x00,
];

#[tokio::test]
async fn scrubs_garbage_around_packets() {
    let mut fixture = fixture();
    fixture.push_data_to_driver(&NOISY_BURST);

    assert_eq!(
        fixture.read_packet().await.expect("first packet"),
        vec![0x00, 0x61, 0x62, 0x00]
    );
    assert_eq!(
        fixture.read_packet().await.expect("second packet"),
        vec![0x00, 0x63, 0x64, 0x00]
    );

    let status = fixture.driver.status();
    assert_eq!(status.bad_rx, 8);
    assert_eq!(status.good_rx, 8);
    assert_eq!(status.queued_bytes, 0);
}

#[tokio::test]
async fn clean_packets_come_out_once_each_and_in_order() {
    let mut fixture = fixture();
    fixture.push_data_to_driver(&[0x00, 0x01, 0x02, 0x00, 0x00, 0x03, 0x04, 0x00]);

    assert_eq!(
        fixture.read_packet().await.expect("first packet"),
        vec![0x00, 0x01, 0x02, 0x00]
    );
    assert_eq!(
        fixture.read_packet().await.expect("second packet"),
        vec![0x00, 0x03, 0x04, 0x00]
    );
    assert!(fixture
        .read_packet()
        .await
        .expect_err("nothing left")
        .is_timeout());
}

#[tokio::test]
async fn fragmented_packet_completes_across_reads() {
    let mut fixture = fixture();

    fixture.push_data_to_driver(&[0x00, 0x61]);
    let error = fixture.read_packet().await.expect_err("incomplete packet");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::Packet));
    assert_eq!(fixture.queued_bytes(), 2);

    fixture.push_data_to_driver(&[0x62, 0x00]);
    assert_eq!(
        fixture.read_packet().await.expect("completed packet"),
        vec![0x00, 0x61, 0x62, 0x00]
    );
    assert_eq!(fixture.queued_bytes(), 0);
}

#[tokio::test]
async fn extract_last_returns_the_newest_packet_but_counts_all() {
    let mut fixture = fixture_extract_last();
    fixture.push_data_to_driver(&NOISY_BURST);

    assert_eq!(
        fixture.read_packet().await.expect("newest packet"),
        vec![0x00, 0x63, 0x64, 0x00]
    );

    let status = fixture.driver.status();
    assert_eq!(status.good_rx, 8, "superseded packets still count");
    assert_eq!(status.bad_rx, 8);
    assert_eq!(status.queued_bytes, 0);
}

#[tokio::test]
async fn first_byte_timeout_reclassifies_once_data_arrives() {
    let mut fixture = fixture();

    let error = fixture
        .driver
        .read_packet_timed(
            &fixture.extractor,
            &mut vec![0; MAX_PACKET],
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
        .await
        .expect_err("no data at all");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::FirstByte));

    fixture.push_data_to_driver(&[0x00]);
    let error = fixture
        .driver
        .read_packet_timed(
            &fixture.extractor,
            &mut vec![0; MAX_PACKET],
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
        .await
        .expect_err("prefix only");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::Packet));
}

#[tokio::test]
async fn zero_packet_timeout_reports_first_byte_without_data() {
    let mut fixture = fixture();
    let error = fixture.read_packet().await.expect_err("nothing queued");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::FirstByte));
}

#[tokio::test]
async fn undersized_output_buffer_is_rejected_before_touching_the_stream() {
    let mut fixture = fixture();
    fixture.push_data_to_driver(&[0x00, 0x61, 0x62, 0x00]);

    let mut small = [0u8; 4];
    let error = fixture
        .driver
        .read_packet(&fixture.extractor, &mut small)
        .await
        .expect_err("buffer smaller than max packet size");
    assert!(matches!(
        error,
        DriverError::Length(LengthError::BufferTooSmall {
            got: 4,
            expected: MAX_PACKET,
        })
    ));

    // The stream was not consumed: a proper read still sees the packet.
    assert_eq!(fixture.stream_handle().bytes_to_driver(), 4);
    assert_eq!(
        fixture.read_packet().await.expect("packet intact"),
        vec![0x00, 0x61, 0x62, 0x00]
    );
}

#[tokio::test]
async fn classifier_overshoot_is_a_contract_violation() {
    let overshoot: Classifier = |buffer| buffer.len() as i64 + 1;
    let mut fixture = Fixture::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), overshoot);
    fixture.push_data_to_driver(&[1, 2, 3]);

    let error = fixture.read_packet().await.expect_err("overshooting verdict");
    assert!(matches!(
        error,
        DriverError::Length(LengthError::ClassifierContract { returned: 4, .. })
    ));
}

#[tokio::test]
async fn classifier_undershoot_is_a_contract_violation() {
    let undershoot: Classifier = |buffer| -(buffer.len() as i64) - 1;
    let mut fixture = Fixture::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), undershoot);
    fixture.push_data_to_driver(&[1, 2, 3]);

    let error = fixture.read_packet().await.expect_err("undershooting verdict");
    assert!(matches!(
        error,
        DriverError::Length(LengthError::ClassifierContract { returned: -4, .. })
    ));
}

#[tokio::test]
async fn whole_buffer_discard_leaves_a_clean_slate() {
    let mut fixture = fixture();
    // Zero-led, but byte 3 is not zero: the classifier discards all four.
    fixture.push_data_to_driver(&[0x00, 0x61, 0x62, 0x63]);

    let error = fixture.read_packet().await.expect_err("all junk");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::Packet));
    assert_eq!(fixture.queued_bytes(), 0);
    assert_eq!(fixture.driver.status().bad_rx, 4);

    fixture.push_data_to_driver(&[0x00, 0x61, 0x62, 0x00]);
    assert_eq!(
        fixture.read_packet().await.expect("subsequent packet"),
        vec![0x00, 0x61, 0x62, 0x00]
    );
}

#[tokio::test]
async fn oversized_packet_fails_with_a_length_error() {
    // Claims a valid prefix forever, so the buffer can only fill up.
    let bottomless: Classifier = |_| 0;
    let mut fixture = Fixture::new(NonZeroUsize::new(8).expect("non-zero"), bottomless);
    fixture.push_data_to_driver(&[0u8; 16]);

    let error = fixture.read_packet().await.expect_err("buffer overflow");
    assert!(matches!(
        error,
        DriverError::Length(LengthError::PacketTooLarge { capacity: 8 })
    ));
}

#[test]
fn has_packet_is_idempotent_and_leaves_statistics_alone() {
    let driver = {
        let mut driver = Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), false);
        driver
            .push_bytes(&[0x61, 0x00, 0x61, 0x62, 0x00])
            .expect("fits");
        driver
    };
    let classifier = zero_framed as Classifier;

    let before = driver.status();
    assert!(driver.has_packet(&classifier).expect("contract respected"));
    assert!(driver.has_packet(&classifier).expect("contract respected"));
    assert_eq!(driver.status(), before);
    assert_eq!(driver.status().queued_bytes, 5);
}

#[test]
fn has_packet_sees_through_leading_junk_but_not_prefixes() {
    let mut driver = Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), false);
    let classifier = zero_framed as Classifier;

    driver.push_bytes(&[0x00, 0x61]).expect("fits");
    assert!(!driver.has_packet(&classifier).expect("contract respected"));

    driver.push_bytes(&[0x62, 0x00]).expect("fits");
    assert!(driver.has_packet(&classifier).expect("contract respected"));
}

#[tokio::test]
async fn stream_less_driver_serves_packets_from_pushed_bytes() {
    let mut driver = Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), false);
    let classifier = zero_framed as Classifier;
    driver
        .push_bytes(&[0x61, 0x00, 0x61, 0x62, 0x00])
        .expect("fits");

    let mut out = vec![0; MAX_PACKET];
    let size = driver
        .read_packet(&classifier, &mut out)
        .await
        .expect("packet in the internal buffer");
    assert_eq!(&out[..size], &[0x00, 0x61, 0x62, 0x00]);

    let error = driver
        .read_packet(&classifier, &mut out)
        .await
        .expect_err("buffer exhausted");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::Packet));
}

#[tokio::test]
async fn written_bytes_reach_the_device_verbatim() {
    let mut fixture = fixture();
    let payload = [0x00, 0xde, 0xad, 0x00];
    fixture.write_packet(&payload).await.expect("write");

    assert_eq!(fixture.read_data_from_driver(), payload.to_vec());
    let status = fixture.driver.status();
    assert_eq!(status.tx, 4);
    assert!(status.stamp.is_some());
}

#[tokio::test]
async fn listeners_tap_both_directions_in_wire_order() {
    let mut fixture = fixture();
    let listener = Arc::new(BufferListener::new());
    fixture.driver.add_listener(listener.clone());

    fixture.push_data_to_driver(&NOISY_BURST);
    fixture.read_packet().await.expect("first packet");
    fixture.write_packet(&[0x00, 0x01, 0x02, 0x00]).await.expect("write");

    // The tap sees raw wire traffic, junk included.
    assert_eq!(listener.flush_read().as_ref(), &NOISY_BURST);
    assert_eq!(listener.flush_write().as_ref(), &[0x00, 0x01, 0x02, 0x00]);
}

#[tokio::test]
async fn removed_listeners_see_nothing_further() {
    let mut fixture = fixture();
    let listener = Arc::new(BufferListener::new());
    let registered: Arc<dyn IoListener> = listener.clone();
    fixture.driver.add_listener(registered.clone());
    fixture.driver.remove_listener(&registered);

    fixture.write_packet(&[0x00, 0x01, 0x02, 0x00]).await.expect("write");
    assert!(listener.flush_write().is_empty());
}

#[tokio::test]
async fn read_raw_drains_the_internal_buffer_before_the_stream() {
    let mut fixture = fixture();

    // Leave a partial packet in the internal buffer.
    fixture.push_data_to_driver(&[0x00, 0x61]);
    fixture.read_packet().await.expect_err("incomplete");
    assert_eq!(fixture.queued_bytes(), 2);

    fixture.push_data_to_driver(&[0x62, 0x63, 0x64]);
    let mut out = vec![0; 32];
    let size = fixture
        .driver
        .read_raw_timed(
            &mut out,
            Duration::from_millis(10),
            Duration::from_millis(10),
            None,
        )
        .await
        .expect("raw read");
    assert_eq!(&out[..size], &[0x00, 0x61, 0x62, 0x63, 0x64]);
    assert_eq!(fixture.queued_bytes(), 0);
}

#[tokio::test]
async fn read_raw_returns_short_instead_of_raising_on_timeout() {
    let mut fixture = fixture();
    let mut out = vec![0; 32];
    let size = fixture
        .driver
        .read_raw_timed(
            &mut out,
            Duration::from_millis(5),
            Duration::from_millis(5),
            None,
        )
        .await
        .expect("raw read never raises on timeout");
    assert_eq!(size, 0);
}

#[tokio::test]
async fn read_raw_respects_the_output_capacity() {
    let mut fixture = fixture();
    fixture.push_data_to_driver(&[1, 2, 3, 4, 5]);

    let mut out = vec![0; 3];
    let size = fixture
        .driver
        .read_raw_timed(
            &mut out,
            Duration::from_millis(10),
            Duration::from_millis(10),
            None,
        )
        .await
        .expect("raw read");
    assert_eq!(&out[..size], &[1, 2, 3]);
}

#[tokio::test]
async fn read_raw_inter_byte_timeout_ends_the_read_early() {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    let mut driver = Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), false);
    driver.set_main_stream(Box::new(FdStream::new(rx, true).expect("fd stream")));

    assert_eq!(
        unsafe { libc::write(tx.as_raw_fd(), [0x61u8, 0x62].as_ptr().cast(), 2) },
        2
    );

    let started = Instant::now();
    let mut out = [0u8; 32];
    let size = driver
        .read_raw_timed(
            &mut out,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Some(Duration::from_millis(50)),
        )
        .await
        .expect("raw read");
    assert_eq!(&out[..size], &[0x61, 0x62]);
    // The inter-byte gap ended the read long before the packet budget.
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn byte_dumps_render_escapes_and_hex() {
    assert_eq!(printable_bytes(b"a\x00b\nc\r"), "\"a\\x00b\\nc\\r\"");
    assert_eq!(hex_bytes(&[0x00, 0x61, 0xff]), "0061ff");
}

#[tokio::test]
async fn clear_drops_stream_and_internal_bytes() {
    let mut fixture = fixture();
    fixture.push_data_to_driver(&[0x00, 0x61]);
    fixture.read_packet().await.expect_err("incomplete");
    fixture.push_data_to_driver(&[0x62, 0x00]);
    assert_eq!(fixture.queued_bytes(), 2);

    fixture.driver.clear().expect("clear");
    assert_eq!(fixture.queued_bytes(), 0);
    assert_eq!(fixture.stream_handle().bytes_to_driver(), 0);

    let error = fixture.read_packet().await.expect_err("everything gone");
    assert_eq!(error.timeout_kind(), Some(TimeoutKind::FirstByte));
}

#[tokio::test]
async fn close_is_idempotent_and_detaches_the_stream() {
    let mut fixture = fixture();
    assert!(fixture.driver.is_open());
    fixture.driver.close();
    fixture.driver.close();
    assert!(!fixture.driver.is_open());
}

#[tokio::test]
async fn eof_follows_the_stream() {
    let stream = TestStream::new();
    let handle = stream.handle();
    let mut driver = Driver::new(NonZeroUsize::new(MAX_PACKET).expect("non-zero"), false);
    assert!(!driver.eof());
    driver.set_main_stream(Box::new(stream));
    assert!(!driver.eof());
    handle.set_eof(true);
    assert!(driver.eof());
}

proptest! {
    /// Every byte ever read from the stream is accounted for exactly once:
    /// delivered, discarded, or still queued. (Extract-last is exempt: its
    /// in-scan accounting deliberately tolerates re-counting junk behind a
    /// superseded packet.)
    #[test]
    fn byte_conservation_across_arbitrary_noise(
        data in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let mut fixture = Fixture::new(
                NonZeroUsize::new(MAX_PACKET).expect("non-zero"),
                zero_framed as Classifier,
            );
            fixture.push_data_to_driver(&data);

            loop {
                match fixture.read_packet().await {
                    Ok(packet) => prop_assert_eq!(packet.len(), 4),
                    Err(error) => {
                        prop_assert!(error.is_timeout());
                        break;
                    }
                }
            }

            let status = fixture.driver.status();
            let consumed = data.len() - fixture.stream_handle().bytes_to_driver();
            prop_assert_eq!(
                status.good_rx + status.bad_rx + status.queued_bytes as u64,
                consumed as u64
            );
            Ok(())
        })?;
    }
}

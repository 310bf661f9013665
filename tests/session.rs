mod common;

use std::sync::Arc;

use pad_flasher::report::{Level, Stage};
use pad_flasher::{
    Checksum, DeviceConfig, DeviceSession, DigestVerifier, ErrorKind, Recovery, State, Transport,
    Validation, Verifier,
};
use pretty_assertions::assert_eq;

use common::{image, Behaviour, MockConnector, MockLink, Probe};

fn sha256() -> DigestVerifier {
    DigestVerifier::new(Checksum::Sha256)
}

#[test]
fn full_lifecycle_with_validation() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::ok());
    let verifier = sha256();
    let img = image(1024);

    let cfg = DeviceConfig::uart("/dev/ttyUSB0").validate(true);
    let outcome = DeviceSession::new(0, cfg, &connector, &verifier).run(&img);

    assert_eq!(
        outcome.stages,
        vec![State::Connecting, State::Programming, State::Validating, State::Disconnecting, State::Done]
    );
    assert!(outcome.is_success());
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.validation, Validation::Passed);
    assert_eq!(outcome.bytes_written, 1024);
    assert_eq!(outcome.baud_rate, Some(115_200));

    let probe = connector.probe("/dev/ttyUSB0");
    assert_eq!(probe.programmed(), img.bytes().to_vec());
    assert_eq!(probe.close_calls(), 1);
}

#[test]
fn validation_not_requested_is_its_own_result() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::ok());
    let verifier = sha256();

    let outcome = DeviceSession::new(0, DeviceConfig::uart("/dev/ttyUSB0"), &connector, &verifier).run(&image(64));

    assert_eq!(outcome.state, State::Done);
    assert_eq!(outcome.validation, Validation::NotRequested);
    assert!(!outcome.stages.contains(&State::Validating));
    assert_eq!(outcome.validation.to_string(), "validation not requested");
    assert_ne!(Validation::NotRequested, Validation::Passed);
    assert_ne!(Validation::NotRequested, Validation::Failed);
}

#[test]
fn connect_failure_ends_the_session() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::unreachable());
    let verifier = sha256();

    let outcome = DeviceSession::new(0, DeviceConfig::uart("/dev/ttyUSB0").validate(true), &connector, &verifier)
        .run(&image(64));

    assert_eq!(outcome.stages, vec![State::Connecting, State::Failed(ErrorKind::ConnectFailed)]);
    assert_eq!(outcome.error, Some(ErrorKind::ConnectFailed));
    assert_eq!(outcome.validation, Validation::Skipped);
    assert!(outcome.message.unwrap().contains("device not responding"));
    assert_eq!(connector.probe("/dev/ttyUSB0").close_calls(), 0);
}

#[test]
fn write_failure_closes_once_and_reports_nothing_written() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::write_error_at(2));
    let verifier = sha256();

    let outcome = DeviceSession::new(0, DeviceConfig::uart("/dev/ttyUSB0").validate(true), &connector, &verifier)
        .run(&image(1024));

    assert_eq!(
        outcome.stages,
        vec![State::Connecting, State::Programming, State::Disconnecting, State::Failed(ErrorKind::WriteFailed)]
    );
    assert_eq!(outcome.bytes_written, 0);
    assert!(outcome.message.unwrap().contains("offset 512"));

    let probe = connector.probe("/dev/ttyUSB0");
    assert_eq!(probe.close_calls(), 1);
    assert_eq!(probe.released(), 1);
}

#[test]
fn validation_failure_is_fatal() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::corrupting());
    let verifier = sha256();

    let outcome = DeviceSession::new(0, DeviceConfig::uart("/dev/ttyUSB0").validate(true), &connector, &verifier)
        .run(&image(1024));

    assert_eq!(outcome.state, State::Failed(ErrorKind::ValidationFailed));
    assert_eq!(outcome.validation, Validation::Failed);
    assert_eq!(connector.probe("/dev/ttyUSB0").close_calls(), 1);
}

#[test]
fn recovery_failure_is_advisory() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::silent());
    let verifier = sha256();

    let cfg = DeviceConfig::uart("/dev/ttyUSB0").recovery(true);
    let outcome = DeviceSession::new(0, cfg, &connector, &verifier).run(&image(256));

    assert_eq!(outcome.state, State::Done);
    assert_eq!(outcome.recovery, Recovery::Failed);
    assert_eq!(
        outcome.stages,
        vec![State::Connecting, State::RecoveryPending, State::Programming, State::Disconnecting, State::Done]
    );
    assert!(outcome.events.iter().any(|e| e.stage == Stage::Recovery
        && e.level == Level::Warn
        && e.message.contains("RECOVERY_FAILED")));
}

#[test]
fn recovery_sync_succeeds() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::ok());
    let verifier = sha256();

    let cfg = DeviceConfig::uart("/dev/ttyUSB0").recovery(true).validate(true);
    let outcome = DeviceSession::new(0, cfg, &connector, &verifier).run(&image(256));

    assert_eq!(outcome.recovery, Recovery::Synced);
    assert_eq!(outcome.validation, Validation::Passed);
    // the sync pattern is not part of the programmed image
    assert_eq!(connector.probe("/dev/ttyUSB0").programmed().len(), 256);
}

#[test]
fn unsupported_baud_connects_at_default_with_warning() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::ok());
    let verifier = sha256();

    let cfg = DeviceConfig::uart("/dev/ttyUSB0").with_baud(12_345);
    let outcome = DeviceSession::new(0, cfg, &connector, &verifier).run(&image(16));

    assert_eq!(outcome.state, State::Done);
    assert_eq!(outcome.baud_rate, Some(115_200));
    let warning = outcome.events.iter().find(|e| e.level == Level::Warn).expect("baud warning");
    assert_eq!(warning.stage, Stage::Connect);
    assert!(warning.message.contains("12345"));
}

#[test]
fn custom_verifier_sees_the_image() {
    let connector = MockConnector::new().device("/dev/ttyUSB0", Behaviour::ok());
    let reject_small = |_: &mut dyn Transport, img: &pad_flasher::FirmwareImage| img.len() > 100;

    let cfg = DeviceConfig::uart("/dev/ttyUSB0").validate(true);
    let outcome = DeviceSession::new(0, cfg, &connector, &reject_small as &dyn Verifier).run(&image(10));

    assert_eq!(outcome.state, State::Failed(ErrorKind::ValidationFailed));
    assert_eq!(outcome.message.as_deref(), Some("custom check failed"));
}

#[test]
fn close_is_idempotent() {
    let probe = Arc::new(Probe::default());
    let mut link = MockLink::standalone(probe.clone());

    link.close();
    link.close();

    assert_eq!(probe.close_calls(), 2);
    assert_eq!(probe.released(), 1);
    assert!(link.send(&[0]).is_err());
}

//! Status monitor and correction engine against the mock transport.

mod support;

use launcher_common::prelude::*;
use launcher_driver::correction::conflicting_axis;
use launcher_driver::CorrectionEngine;
use std::sync::Arc;
use std::thread;
use support::{attach, controller, wait_until, WAIT};

const STOP_FRAME: [u8; 8] = [0x02, 0x20, 0, 0, 0, 0, 0, 0];

fn at_limit(up: bool, down: bool, left: bool, right: bool) -> LimitState {
    LimitState {
        max_up: up,
        max_down: down,
        max_left: left,
        max_right: right,
    }
}

// ─── Scenario ───────────────────────────────────────────────────────

#[test]
fn limit_reached_while_driving_up_issues_one_stop() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    assert_eq!(file.write(&[0x02]), 1);
    assert!(mock.report_limits(at_limit(true, false, false, false)));

    assert!(session.limit_state().max_up);
    assert!(session.correction_needed());
    assert!(session.correction_in_flight());
    assert!(session.is_correcting());

    let corrections = mock.submitted_of(TransferKind::Correction);
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].data, STOP_FRAME);
    assert_eq!(corrections[0].setup, Some(SetupPacket::LAUNCHER_COMMAND));

    // The monitor re-armed after running the correction.
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 1);

    assert!(mock.complete_next(TransferKind::Correction, TransferStatus::Completed));
    assert!(!session.correction_in_flight());
    // Only the engine's own flag is cleared.
    assert_eq!(session.last_commanded(), Command::UP);
    assert_eq!(session.stats().snapshot().corrections_issued, 1);
}

// ─── Rule table ─────────────────────────────────────────────────────

#[test]
fn repeated_evaluation_does_not_stack_corrections() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::DOWN).unwrap();
    assert!(mock.report_limits(at_limit(false, true, false, false)));
    assert_eq!(mock.submitted_of(TransferKind::Correction).len(), 1);

    assert!(CorrectionEngine::evaluate(&session));
    assert!(!CorrectionEngine::apply(&session));
    assert!(CorrectionEngine::evaluate(&session));
    assert!(!CorrectionEngine::apply(&session));

    // Another identical report while the stop is outstanding.
    assert!(mock.report_limits(at_limit(false, true, false, false)));
    assert_eq!(mock.submitted_of(TransferKind::Correction).len(), 1);
}

#[test]
fn up_wins_over_left() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::UP | Command::LEFT).unwrap();
    assert!(mock.report_limits(at_limit(true, false, true, false)));

    assert_eq!(
        conflicting_axis(session.last_commanded(), session.limit_state()),
        Some(LimitAxis::Up)
    );
    let corrections = mock.submitted_of(TransferKind::Correction);
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].data, STOP_FRAME);
}

#[test]
fn limit_on_another_axis_is_not_corrected() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::DOWN).unwrap();
    assert!(mock.report_limits(at_limit(true, false, false, true)));

    assert!(!session.correction_needed());
    assert!(!session.correction_in_flight());
    assert!(mock.submitted_of(TransferKind::Correction).is_empty());
}

#[test]
fn released_limit_clears_the_needed_flag() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    mock.auto_complete(TransferKind::Correction, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::RIGHT).unwrap();
    assert!(mock.report_limits(at_limit(false, false, false, true)));
    assert!(session.correction_needed());
    assert!(!session.correction_in_flight());

    assert!(mock.report_limits(LimitState::default()));
    assert!(!session.correction_needed());
    assert_eq!(mock.submitted_of(TransferKind::Correction).len(), 1);
}

// ─── Failure bias ───────────────────────────────────────────────────

#[test]
fn failed_stop_stays_latched() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::LEFT).unwrap();
    assert!(mock.report_limits(at_limit(false, false, true, false)));
    assert!(mock.complete_next(
        TransferKind::Correction,
        TransferStatus::Failed("pipe".into())
    ));

    assert!(session.correction_in_flight());
    assert_eq!(session.stats().snapshot().correction_failures, 1);
    // No caller sees the failure.
    assert_eq!(session.last_error(), None);

    assert!(mock.report_limits(at_limit(false, false, true, false)));
    assert_eq!(mock.submitted_of(TransferKind::Correction).len(), 1);
}

#[test]
fn refused_stop_is_retried_on_the_next_report() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::UP).unwrap();
    mock.refuse(TransferKind::Correction, TransportError::NoResources);
    assert!(mock.report_limits(at_limit(true, false, false, false)));
    assert!(!session.correction_in_flight());
    assert_eq!(session.stats().snapshot().correction_failures, 1);

    mock.accept(TransferKind::Correction);
    assert!(mock.report_limits(at_limit(true, false, false, false)));
    assert!(session.correction_in_flight());
    assert_eq!(mock.submitted_of(TransferKind::Correction).len(), 1);
}

#[test]
fn next_stop_follows_a_completed_one_from_another_thread() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    let file = ctl.open(session.minor()).unwrap();

    file.send(Command::UP).unwrap();
    assert!(mock.report_limits(at_limit(true, false, false, false)));
    assert_eq!(mock.pending_of(TransferKind::Correction), 1);

    for round in 2..=50 {
        let completer = {
            let mock = Arc::clone(&mock);
            thread::spawn(move || {
                assert!(mock.complete_next(TransferKind::Correction, TransferStatus::Completed));
            })
        };
        assert!(wait_until(WAIT, || !session.correction_in_flight()));
        // Once the flag is clear the buffer is available again.
        assert!(mock.report_limits(at_limit(true, false, false, false)));
        assert_eq!(mock.submitted_of(TransferKind::Correction).len(), round);
        completer.join().unwrap();
    }
    assert_eq!(session.stats().snapshot().correction_failures, 0);
}

// ─── Status monitor ─────────────────────────────────────────────────

#[test]
fn transient_status_error_keeps_polling() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);

    assert!(mock.complete_next(
        TransferKind::StatusPoll,
        TransferStatus::Failed("babble".into())
    ));
    assert!(session.monitor_active());
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 1);
    assert!(matches!(session.last_error(), Some(DriverError::Transport(_))));
    assert_eq!(session.stats().snapshot().status_errors, 1);
}

#[test]
fn short_payload_is_not_decoded() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);

    assert!(mock.report_limits(at_limit(false, false, true, false)));
    assert!(mock.complete_status(&[0x80]));

    // Previous flags kept, poll re-armed.
    assert_eq!(session.limit_state(), at_limit(false, false, true, false));
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 1);
    assert!(matches!(session.last_error(), Some(DriverError::Transport(_))));
}

#[test]
fn stalled_status_clears_its_own_endpoint() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);

    assert!(mock.complete_next(TransferKind::StatusPoll, TransferStatus::Stalled));
    assert_eq!(session.last_error(), Some(DriverError::Halted));
    assert_eq!(mock.halts_cleared(), vec![0x81]);
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 1);
    assert!(!session.control_halted());

    // The control endpoint was never halted: no clear before the command.
    let file = ctl.open(session.minor()).unwrap();
    assert_eq!(file.send(Command::UP), Ok(()));
    assert_eq!(mock.halts_cleared(), vec![0x81]);
    assert_eq!(mock.submitted_of(TransferKind::Command).len(), 1);
}

#[test]
fn failed_status_clear_keeps_polling_and_commanding() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);
    mock.auto_complete(TransferKind::Command, TransferStatus::Completed);
    mock.fail_clear_halt(Some(TransportError::Stalled));

    assert!(mock.complete_next(TransferKind::StatusPoll, TransferStatus::Stalled));
    assert_eq!(mock.halts_cleared(), vec![0x81]);
    assert!(session.monitor_active());
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 1);

    let file = ctl.open(session.minor()).unwrap();
    assert_eq!(file.send(Command::LEFT), Ok(()));
    assert_eq!(mock.submitted_of(TransferKind::Command).len(), 1);
    assert_eq!(mock.halts_cleared(), vec![0x81]);

    // A second stall retries the clear.
    assert!(mock.complete_next(TransferKind::StatusPoll, TransferStatus::Stalled));
    assert_eq!(mock.halts_cleared(), vec![0x81, 0x81]);
    assert_eq!(session.stats().snapshot().status_errors, 2);
}

#[test]
fn cancellation_stops_the_monitor() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);

    assert!(mock.complete_next(TransferKind::StatusPoll, TransferStatus::Cancelled));
    assert!(!session.monitor_active());
    assert_eq!(mock.pending_of(TransferKind::StatusPoll), 0);
    assert_eq!(mock.submitted_of(TransferKind::StatusPoll).len(), 1);
    assert_eq!(session.last_error(), None);
}

#[test]
fn extra_status_bytes_are_ignored() {
    let ctl = controller();
    let (mock, session) = attach(&ctl);

    assert!(mock.complete_status(&[0x40, 0x08, 0xff, 0xff]));
    assert_eq!(session.limit_state(), at_limit(false, true, false, true));
}

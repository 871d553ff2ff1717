mod common;

use std::time::{Duration, Instant};

use bacnet_mstp_loopback::client::{
    locator, loopback, Awaiting, BacnetAddress, Event, LoopbackError, PollOutcome, Sequencer, Step,
};
use bacnet_mstp_loopback::config::LoopbackConfig;
use bacnet_mstp_loopback::datalink::DataLinkAddress;
use bacnet_mstp_loopback::object::{
    ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue,
};

use common::{client, loopback_config, Behavior, DEVICE_ID, DEVICE_STATION};

#[test]
fn test_locates_answering_device() {
    let mut client = client(Behavior::default());
    let device = locator::locate_device(&mut client, &loopback_config()).unwrap();

    assert_eq!(device.device_id, DEVICE_ID);
    assert_eq!(device.address, BacnetAddress::local(DataLinkAddress::MsTP(DEVICE_STATION)));
    assert_eq!(device.max_apdu, 480);
    assert_eq!(device.vendor_id, 42);
    assert!(device.dynamic);
    assert_eq!(client.link().log.who_is, 1);
}

#[test]
fn test_locates_device_answering_late() {
    let mut client = client(Behavior {
        ignore_who_is: 3,
        ..Behavior::default()
    });
    let device = locator::locate_device(&mut client, &loopback_config()).unwrap();
    assert_eq!(device.device_id, DEVICE_ID);
    assert_eq!(client.link().log.who_is, 4);
}

#[test]
fn test_gives_up_after_five_rounds() {
    let mut client = client(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let err = locator::locate_device(&mut client, &loopback_config()).unwrap_err();

    assert!(matches!(err, LoopbackError::DeviceNotFound));
    assert_eq!(err.to_string(), "Failed to locate a device on the network!");
    assert_eq!(client.link().log.who_is, 0);
    assert!(client.device().is_none());
}

#[test]
fn test_counts_who_is_broadcasts() {
    // Listens but never answers: every round is a Who-Is on the wire
    let mut client = client(Behavior {
        ignore_who_is: usize::MAX,
        ..Behavior::default()
    });
    let err = locator::locate_device(&mut client, &loopback_config()).unwrap_err();
    assert!(matches!(err, LoopbackError::DeviceNotFound));
    assert_eq!(client.link().log.who_is, 5);
}

#[test]
fn test_target_device_filters_discovery() {
    let mut client = client(Behavior::default());
    let config = LoopbackConfig {
        target_device: Some(DEVICE_ID + 1),
        discovery_attempts: 2,
        ..loopback_config()
    };
    let err = locator::locate_device(&mut client, &config).unwrap_err();
    assert!(matches!(err, LoopbackError::DeviceNotFound));
    assert_eq!(client.link().log.who_is, 2);

    let config = LoopbackConfig {
        target_device: Some(DEVICE_ID),
        ..loopback_config()
    };
    let device = locator::locate_device(&mut client, &config).unwrap();
    assert_eq!(device.device_id, DEVICE_ID);
}

#[test]
fn test_unsolicited_i_am_binds_without_who_is() {
    let mut client = client(Behavior::default());
    client.link_mut().announce();
    assert!(matches!(
        client.handler_loop(Awaiting::IAm).unwrap(),
        PollOutcome::Completed(Event::IAm(_))
    ));

    locator::locate_device(&mut client, &loopback_config()).unwrap();
    assert_eq!(client.link().log.who_is, 0);
}

#[test]
fn test_loopback_against_echoing_device() {
    let mut client = client(Behavior::default());
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let mut sequencer = Sequencer::new(config);
    sequencer.run(&mut client).unwrap();
    assert_eq!(sequencer.step(), Step::ValueChecked);
    assert_eq!(sequencer.passed(), 2);

    let log = &client.link().log;
    let written: Vec<_> = log.writes.iter().map(|w| w.property_value.clone()).collect();
    assert_eq!(written, vec![PropertyValue::Enumerated(0), PropertyValue::Enumerated(1)]);
    for write in &log.writes {
        assert_eq!(write.object_identifier.object_type, ObjectType::BinaryOutput);
        assert_eq!(write.object_identifier.instance, 1);
        assert_eq!(write.property_identifier, PropertyIdentifier::PresentValue);
        assert_eq!(write.priority, None);
        assert_eq!(write.property_array_index, None);
    }
    assert_eq!(log.reads.len(), 2);
    assert!(log
        .reads
        .iter()
        .all(|r| r.object_identifier.object_type == ObjectType::BinaryInput));

    // Every request used its own invoke ID and released it
    assert_eq!(log.invoke_ids, vec![1, 2, 3, 4]);
    for id in 1..=4 {
        assert!(client.invoke_id_free(id));
    }
    assert_eq!(
        client.device().unwrap().last_value,
        Some(PropertyValue::Enumerated(1))
    );
}

#[test]
fn test_stuck_input_reports_mismatch() {
    let mut client = client(Behavior {
        stuck_input: Some(0),
        ..Behavior::default()
    });
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let mut sequencer = Sequencer::new(config);
    let err = sequencer.run(&mut client).unwrap_err();
    assert_eq!(err.to_string(), "ERROR! Input was not 1");
    assert!(matches!(
        err,
        LoopbackError::ValueMismatch {
            expected: 1,
            actual: Some(0)
        }
    ));
    assert_eq!(sequencer.step(), Step::Failed);
    assert_eq!(sequencer.passed(), 1);
}

#[test]
fn test_unacknowledged_write_fails() {
    let mut client = client(Behavior {
        no_write_ack: true,
        ..Behavior::default()
    });
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let err = loopback::run_loopback(&mut client, &config).unwrap_err();
    assert_eq!(err.to_string(), "Failed to toggle relay!");
    assert!(client.link().log.reads.is_empty());
    assert!(client.invoke_id_free(1));
    assert_eq!(client.session().pending(), None);
}

#[test]
fn test_error_answer_fails_write_at_once() {
    let mut client = client(Behavior {
        write_error: true,
        ..Behavior::default()
    });
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let started = Instant::now();
    let err = loopback::run_loopback(&mut client, &config).unwrap_err();
    assert!(matches!(err, LoopbackError::WriteFailed));
    assert!(started.elapsed() < client.config().apdu_timeout);
    assert!(client.invoke_id_free(1));
}

#[test]
fn test_unanswered_read_fails() {
    let mut client = client(Behavior {
        no_read_ack: true,
        ..Behavior::default()
    });
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let err = loopback::run_loopback(&mut client, &config).unwrap_err();
    assert_eq!(err.to_string(), "Failed to read input!");
    assert_eq!(client.link().log.writes.len(), 1);
    assert!(!client.link().log.reads.is_empty());
    assert_eq!(client.session().pending(), None);
}

#[test]
fn test_sequencer_requires_bound_device() {
    let mut client = client(Behavior::default());
    let err = loopback::run_loopback(&mut client, &loopback_config()).unwrap_err();
    assert!(matches!(err, LoopbackError::DeviceNotFound));
}

#[test]
fn test_unbound_device_cannot_be_addressed() {
    let mut client = client(Behavior::default());
    let err = client
        .send_read_property(
            77,
            ObjectIdentifier::new(ObjectType::BinaryInput, 1),
            PropertyIdentifier::PresentValue,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LoopbackError::NotBound(77)));
}

#[test]
fn test_poll_loop_times_out_when_idle() {
    let mut client = client(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let timeout = client.config().apdu_timeout;
    let started = Instant::now();
    assert_eq!(client.handler_loop(Awaiting::WriteAck).unwrap(), PollOutcome::TimedOut);
    assert!(started.elapsed() >= timeout);
}

#[test]
fn test_poll_loop_returns_once_event_arrives() {
    let mut client = client(Behavior::default());
    client.link_mut().announce();

    let started = Instant::now();
    let outcome = client.handler_loop(Awaiting::IAm).unwrap();
    assert!(matches!(
        outcome,
        PollOutcome::Completed(Event::IAm(ref b)) if b.device_id == DEVICE_ID
    ));
    assert!(started.elapsed() < Duration::from_millis(40));
}

#[test]
fn test_settle_delay_does_not_age_the_next_request() {
    let mut client = client(Behavior::default());
    // Longer than the APDU timeout
    let config = LoopbackConfig {
        settle_delay: Duration::from_millis(100),
        ..loopback_config()
    };
    locator::locate_device(&mut client, &config).unwrap();

    let mut sequencer = Sequencer::new(config);
    sequencer.run(&mut client).unwrap();

    let log = &client.link().log;
    assert_eq!(log.writes.len(), 2);
    assert_eq!(log.reads.len(), 2);
    assert_eq!(log.invoke_ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_gap_between_polls_is_not_charged_to_new_request() {
    let mut client = client(Behavior::default());
    locator::locate_device(&mut client, &loopback_config()).unwrap();
    let output = ObjectIdentifier::new(ObjectType::BinaryOutput, 1);
    let input = ObjectIdentifier::new(ObjectType::BinaryInput, 1);

    client
        .send_write_property(
            DEVICE_ID,
            output,
            PropertyIdentifier::PresentValue,
            PropertyValue::Enumerated(1),
            None,
        )
        .unwrap();
    assert!(matches!(
        client.handler_loop(Awaiting::WriteAck).unwrap(),
        PollOutcome::Completed(Event::WriteAcknowledged { invoke_id: 1 })
    ));

    std::thread::sleep(Duration::from_millis(100));

    let invoke_id = client
        .send_read_property(DEVICE_ID, input, PropertyIdentifier::PresentValue, None)
        .unwrap();
    assert!(matches!(
        client.handler_loop(Awaiting::ReadAck).unwrap(),
        PollOutcome::Completed(Event::ReadCompleted { .. })
    ));
    assert_eq!(invoke_id, 2);
    assert_eq!(client.link().log.invoke_ids, vec![1, 2]);
}

#[test]
fn test_retransmitted_request_is_answered() {
    let mut client = client(Behavior {
        lose_requests: 1,
        ..Behavior::default()
    });
    let config = loopback_config();
    locator::locate_device(&mut client, &config).unwrap();

    let mut sequencer = Sequencer::new(config);
    sequencer.run(&mut client).unwrap();

    let log = &client.link().log;
    assert_eq!(log.lost, 1);
    // The lost write went out again under the same invoke ID
    assert_eq!(log.invoke_ids, vec![1, 2, 3, 4]);
    assert_eq!(log.writes.len(), 2);
    for id in 1..=4 {
        assert!(client.invoke_id_free(id));
    }
}

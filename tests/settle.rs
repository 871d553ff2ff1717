use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bacnet_mstp_loopback::datalink::mstp::{FrameReceiver, MstpFrame, MstpFrameType, SerialLink};
use bacnet_mstp_loopback::{Client, ClientConfig, MstpConfig, MstpDataLink};

const THIS_STATION: u8 = 3;
const OTHER_MASTER: u8 = 5;

/// Serial port whose received chunks only become readable once due
#[derive(Debug, Default)]
struct TimedPort {
    scheduled: VecDeque<(Instant, Vec<u8>)>,
    sent: Vec<(Instant, Vec<u8>)>,
}

impl TimedPort {
    fn schedule(&mut self, at: Instant, bytes: Vec<u8>) {
        self.scheduled.push_back((at, bytes));
    }

    /// Frames written to the port with the time they went out
    fn sent_frames(&self) -> Vec<(Instant, MstpFrame)> {
        let mut frames = Vec::new();
        for (at, bytes) in &self.sent {
            let mut receiver = FrameReceiver::new();
            receiver.push(bytes);
            while let Some(frame) = receiver.next_frame() {
                frames.push((*at, frame));
            }
        }
        frames
    }
}

impl SerialLink for TimedPort {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let due = matches!(self.scheduled.front(), Some((at, _)) if *at <= Instant::now());
        if !due {
            return Ok(0);
        }
        let Some((at, mut bytes)) = self.scheduled.pop_front() else {
            return Ok(0);
        };
        let n = buffer.len().min(bytes.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        if n < bytes.len() {
            self.scheduled.push_front((at, bytes.split_off(n)));
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.sent.push((Instant::now(), data.to_vec()));
        Ok(())
    }
}

fn mstp_config() -> MstpConfig {
    MstpConfig {
        station_address: THIS_STATION,
        max_master: 7,
        // Keep this node from claiming the token during the test
        no_token_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

#[test]
fn test_poll_for_master_answered_while_settling() {
    let config = mstp_config();
    let usage_timeout = config.usage_timeout;
    let link = MstpDataLink::with_port(TimedPort::default(), config);
    let mut client = Client::new(link, ClientConfig::default());

    let due = Instant::now() + Duration::from_millis(100);
    client
        .link_mut()
        .port_mut()
        .schedule(due, MstpFrame::poll_for_master(THIS_STATION, OTHER_MASTER).encode());

    let started = Instant::now();
    client.idle(Duration::from_millis(300)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));

    let replies: Vec<Instant> = client
        .link()
        .port()
        .sent_frames()
        .into_iter()
        .filter(|(_, frame)| {
            frame.frame_type == MstpFrameType::ReplyToPollForMaster
                && frame.destination == OTHER_MASTER
                && frame.source == THIS_STATION
        })
        .map(|(at, _)| at)
        .collect();
    assert_eq!(replies.len(), 1);
    assert!(replies[0] >= due);
    assert!(replies[0].duration_since(due) < usage_timeout);
}

#[test]
fn test_zero_idle_returns_at_once() {
    let link = MstpDataLink::with_port(TimedPort::default(), mstp_config());
    let mut client = Client::new(link, ClientConfig::default());

    let started = Instant::now();
    client.idle(Duration::ZERO).unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert!(client.link().port().sent_frames().is_empty());
}

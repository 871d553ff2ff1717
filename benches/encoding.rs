use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bacnet_mstp_loopback::app::{Apdu, MaxApduSize};
use bacnet_mstp_loopback::datalink::mstp::{FrameReceiver, MstpFrame};
use bacnet_mstp_loopback::network::Npdu;
use bacnet_mstp_loopback::object::{ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue};
use bacnet_mstp_loopback::service::{ReadPropertyAck, WritePropertyRequest};

fn write_request_npdu() -> Vec<u8> {
    let mut data = Vec::new();
    WritePropertyRequest::new(
        ObjectIdentifier::new(ObjectType::BinaryOutput, 1),
        PropertyIdentifier::PresentValue,
        PropertyValue::Enumerated(1),
    )
    .encode(&mut data)
    .unwrap();
    let mut pdu = Npdu::application(true, None).encode();
    pdu.extend(Apdu::confirmed(1, MaxApduSize::Up480, 15, data).encode());
    pdu
}

fn frame_benchmark(c: &mut Criterion) {
    let frame = MstpFrame::bacnet_data(12, 127, write_request_npdu(), true).unwrap();
    let wire = frame.encode();

    c.bench_function("mstp_frame_encode", |b| b.iter(|| black_box(&frame).encode()));

    c.bench_function("mstp_frame_receive", |b| {
        b.iter(|| {
            let mut receiver = FrameReceiver::new();
            receiver.push(black_box(&wire));
            receiver.next_frame()
        })
    });
}

fn apdu_benchmark(c: &mut Criterion) {
    let npdu = write_request_npdu();

    c.bench_function("npdu_apdu_decode", |b| {
        b.iter(|| {
            let (_, offset) = Npdu::decode(black_box(&npdu)).unwrap();
            Apdu::decode(&npdu[offset..]).unwrap()
        })
    });

    let mut ack = Vec::new();
    ReadPropertyAck::new(
        ObjectIdentifier::new(ObjectType::BinaryInput, 1),
        PropertyIdentifier::PresentValue,
        None,
        PropertyValue::Enumerated(1),
    )
    .encode(&mut ack)
    .unwrap();

    c.bench_function("read_property_ack_decode", |b| {
        b.iter(|| ReadPropertyAck::decode(black_box(&ack)).unwrap())
    });
}

criterion_group!(benches, frame_benchmark, apdu_benchmark);
criterion_main!(benches);

// tests/property/codec_test.rs

//! Property-based tests for the length-prefixed envelope framing.

use bytes::{BufMut, BytesMut};
use futures::StreamExt;
use proptest::prelude::*;
use tilegate::core::GatewayError;
use tilegate::core::protocol::{Envelope, EnvelopeCodec, InboundFrame};
use tokio_util::codec::{Decoder, Encoder, FramedRead};

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    (
        1u16..=15,
        prop::option::of(any::<i64>()),
        prop::option::of(any::<u64>()),
        prop::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(|(kind, addressee, correlation, payload)| Envelope {
            kind,
            addressee,
            correlation,
            payload,
        })
}

fn encode_all(envelopes: &[Envelope]) -> BytesMut {
    let mut codec = EnvelopeCodec::default();
    let mut buf = BytesMut::new();
    for envelope in envelopes {
        codec.encode(envelope.clone(), &mut buf).unwrap();
    }
    buf
}

fn decode_all(codec: &mut EnvelopeCodec, buf: &mut BytesMut) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Some(frame) = codec.decode(buf).unwrap() {
        match frame {
            InboundFrame::Envelope(envelope) => out.push(envelope),
            InboundFrame::Malformed { reason, .. } => {
                panic!("unexpected malformed frame: {reason}")
            }
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_frames_survive_arbitrary_read_boundaries(
        envelopes in prop::collection::vec(envelope_strategy(), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let wire = encode_all(&envelopes);
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
        points.push(wire.len());
        points.sort_unstable();

        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut start = 0;
        for end in points {
            buf.extend_from_slice(&wire[start..end]);
            start = end;
            decoded.extend(decode_all(&mut codec, &mut buf));
        }

        prop_assert_eq!(decoded, envelopes);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_declared_length_above_max_is_rejected(
        max in 1usize..1024,
        excess in 1usize..1024,
    ) {
        let declared = (max + excess).min(u16::MAX as usize);
        prop_assume!(declared > max);

        let mut codec = EnvelopeCodec::new(max);
        let mut buf = BytesMut::new();
        buf.put_u16(declared as u16);
        let result = codec.decode(&mut buf);
        prop_assert_eq!(result, Err(GatewayError::FrameTooLarge { len: declared, max }));
    }
}

#[tokio::test]
async fn test_stream_of_chunked_reads_yields_every_frame() {
    let wire = encode_all(&[
        Envelope::heartbeat(),
        Envelope::heartbeat().correlated(9),
    ]);
    let (a, rest) = wire.split_at(1);
    let (b, c) = rest.split_at(rest.len() / 2);
    let mock = tokio_test::io::Builder::new().read(a).read(b).read(c).build();

    let mut frames = FramedRead::new(mock, EnvelopeCodec::default());
    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Envelope(Envelope::heartbeat())
    );
    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Envelope(Envelope::heartbeat().correlated(9))
    );
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn test_garbage_between_frames_is_skipped() {
    let mut wire = BytesMut::new();
    wire.put_u16(2);
    wire.extend_from_slice(&[0xff, 0xff]);
    wire.extend_from_slice(&encode_all(&[Envelope::heartbeat()]));
    let mock = tokio_test::io::Builder::new().read(&wire).build();

    let mut frames = FramedRead::new(mock, EnvelopeCodec::default());
    assert!(matches!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Malformed { len: 2, .. }
    ));
    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Envelope(Envelope::heartbeat())
    );
}

#![allow(clippy::unwrap_used)]

//! Property-based tests for the envelope codec.
//!
//! Uses proptest to verify:
//! 1. Random text and bytes never cause a panic in `decode` (returns `Err`
//!    gracefully).
//! 2. Envelopes of any kind with arbitrary opaque fields survive the relay's
//!    encode → decode path unchanged.
//! 3. Routing fields never leak into the opaque body.

use huddle_proto::envelope::{self, Envelope, EnvelopeKind, RESERVED_FIELDS};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

// --- Strategies ---

/// Wire names, biased towards the kinds the relay interprets.
fn arb_kind() -> impl Strategy<Value = EnvelopeKind> {
    prop_oneof![
        Just(EnvelopeKind::Join),
        Just(EnvelopeKind::Leave),
        Just(EnvelopeKind::Offer),
        Just(EnvelopeKind::Answer),
        Just(EnvelopeKind::AudioToggle),
        "[A-Z][A-Z_]{0,15}".prop_map(EnvelopeKind::from),
    ]
}

/// Opaque JSON values: scalars and shallow SDP/ICE-like objects.
fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,64}".prop_map(Value::from),
        Just(Value::Null),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_body() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        "[a-zA-Z]{1,12}".prop_filter("routing field", |k| {
            !RESERVED_FIELDS.contains(&k.as_str())
        }),
        arb_value(),
        0..6,
    )
    .prop_map(|m| m.into_iter().collect())
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (
        arb_kind(),
        proptest::option::of("[a-z0-9-]{1,12}"),
        proptest::option::of("[a-z0-9-]{1,12}"),
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<bool>()),
        arb_body(),
    )
        .prop_map(|(kind, target, source, enabled, audio_enabled, body)| {
            let mut envelope = Envelope::new(kind);
            envelope.target = target;
            envelope.source = source;
            envelope.enabled = enabled;
            envelope.audio_enabled = audio_enabled;
            envelope.body = body;
            envelope
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn envelope_round_trip(envelope in arb_envelope()) {
        let text = envelope::encode(&envelope).unwrap();
        let decoded = envelope::decode(&text).unwrap();
        prop_assert_eq!(envelope, decoded);
    }

    #[test]
    fn random_text_decode_no_panic(text in ".{0,256}") {
        let _ = envelope::decode(&text);
    }

    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = envelope::decode_bytes(&bytes);
    }

    #[test]
    fn routing_fields_stay_out_of_body(
        kind in "[A-Z_]{1,12}",
        target in "[a-z]{1,8}",
        enabled in any::<bool>(),
        body in arb_body(),
    ) {
        let mut object = body.clone();
        object.insert("type".into(), json!(kind));
        object.insert("target".into(), json!(target));
        object.insert("enabled".into(), json!(enabled));
        object.insert("source".into(), json!("spoofed"));

        let decoded = envelope::decode(&Value::Object(object).to_string()).unwrap();
        prop_assert_eq!(decoded.kind.as_str(), kind.as_str());
        prop_assert_eq!(decoded.target.as_deref(), Some(target.as_str()));
        prop_assert_eq!(decoded.enabled, Some(enabled));
        prop_assert_eq!(decoded.body, body);
    }
}

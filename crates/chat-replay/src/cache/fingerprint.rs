use sha2::{Digest, Sha256};

use crate::{ExampleInput, ParamValue, ProducerKind, ResponseProducer};

/// Hex sha256 over everything that decides what the cache would contain:
/// producer name, version, kind and declared signature, the extras schema and
/// the example list.
///
/// Fields are length-prefixed so adjacent values can't run together.
pub fn fingerprint(producer: &ResponseProducer, examples: &[ExampleInput]) -> String {
    let mut hasher = Sha256::new();

    write_str(&mut hasher, producer.name());
    match producer.version() {
        Some(version) => {
            hasher.update([1u8]);
            write_str(&mut hasher, version);
        }
        None => hasher.update([0u8]),
    }
    hasher.update([match producer.kind() {
        ProducerKind::ReturnsFinal => 0u8,
        ProducerKind::ReturnsStream => 1u8,
    }]);
    hasher.update((producer.expected_parameters() as u64).to_le_bytes());

    hasher.update((producer.schema().len() as u64).to_le_bytes());
    for (name, kind) in producer.schema().iter() {
        write_str(&mut hasher, name);
        write_str(&mut hasher, kind.as_str());
    }

    hasher.update((examples.len() as u64).to_le_bytes());
    for example in examples {
        write_str(&mut hasher, &example.message);
        hasher.update((example.extras.len() as u64).to_le_bytes());
        for value in &example.extras {
            write_value(&mut hasher, value);
        }
    }

    format!("{:x}", hasher.finalize())
}

fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn write_value(hasher: &mut Sha256, value: &ParamValue) {
    match value {
        ParamValue::Boolean(v) => hasher.update([b'b', u8::from(*v)]),
        ParamValue::Integer(v) => {
            hasher.update([b'i']);
            hasher.update(v.to_le_bytes());
        }
        ParamValue::Number(v) => {
            hasher.update([b'n']);
            hasher.update(v.to_bits().to_le_bytes());
        }
        ParamValue::Text(v) => {
            hasher.update([b't']);
            write_str(hasher, v);
        }
    }
}

//! 通道标识。

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// 进程内唯一的全局状态：从 1 开始单调递增。
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// 随机 UUID 的 base62 文本。
pub(crate) fn generate_id() -> String {
    encode_base62(Uuid::new_v4().as_u128())
}

pub(crate) fn encode_base62(mut value: u128) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::with_capacity(22);
    while value > 0 {
        digits.push(ALPHABET[(value % 62) as usize]);
        value /= 62;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_values() {
        assert_eq!(encode_base62(0), "0");
        assert_eq!(encode_base62(61), "z");
        assert_eq!(encode_base62(62), "10");
        assert_eq!(encode_base62(u128::MAX), "7n42DGM5Tflk9n8mt7Fhc7");
    }

    proptest! {
        #[test]
        fn ordering_and_alphabet_are_preserved(a in any::<u128>(), b in any::<u128>()) {
            let (ea, eb) = (encode_base62(a), encode_base62(b));
            prop_assert!(ea.len() <= 22);
            prop_assert!(ea.bytes().all(|byte| ALPHABET.contains(&byte)));
            // 等长时字典序与数值序一致。
            if ea.len() == eb.len() {
                prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
            }
        }
    }
}

//! Property tests for webhook signature verification.

use proptest::prelude::*;

use capstan::signature::{compute, verify, SignatureError};

const ALGORITHMS: &[&str] = &["sha1", "sha256", "sha512"];

fn secret_strategy() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=32)
}

fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=256)
}

fn header_for(algorithm: &str, secret: &[u8], body: &[u8]) -> String {
    format!(
        "{}={}",
        algorithm,
        hex::encode(compute(algorithm, secret, body).unwrap())
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: a digest computed under the same secret always verifies,
    /// for every supported algorithm.
    #[test]
    fn property_correct_digest_verifies(
        secret in secret_strategy(),
        body in body_strategy(),
    ) {
        for algorithm in ALGORITHMS {
            let header = header_for(algorithm, &secret, &body);
            prop_assert_eq!(verify(&secret, &body, Some(&header)), Ok(()));
        }
    }

    /// PROPERTY: flipping a single bit of the body always breaks
    /// verification, wherever the flip lands.
    #[test]
    fn property_single_byte_body_mutation_fails(
        secret in secret_strategy(),
        mut body in proptest::collection::vec(any::<u8>(), 1..=256),
        position in any::<proptest::sample::Index>(),
        bit in 0u8..8,
    ) {
        let header = header_for("sha256", &secret, &body);

        let index = position.index(body.len());
        body[index] ^= 1 << bit;

        prop_assert_eq!(
            verify(&secret, &body, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    /// PROPERTY: corrupting a single hex character of the digest always
    /// breaks verification, wherever the corruption lands.
    #[test]
    fn property_single_digit_digest_mutation_fails(
        secret in secret_strategy(),
        body in body_strategy(),
        position in any::<proptest::sample::Index>(),
        replacement in "[0-9a-f]",
    ) {
        let digest = hex::encode(compute("sha256", &secret, &body).unwrap());

        let index = position.index(digest.len());
        prop_assume!(&digest[index..index + 1] != replacement.as_str());

        let mut forged: Vec<char> = digest.chars().collect();
        forged[index] = replacement.chars().next().unwrap();
        let header = format!("sha256={}", forged.into_iter().collect::<String>());

        prop_assert_eq!(
            verify(&secret, &body, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    /// PROPERTY: a random equal-length digest never verifies.
    #[test]
    fn property_forged_digest_fails(
        secret in secret_strategy(),
        body in body_strategy(),
        forged in "[0-9a-f]{64}",
    ) {
        let real = hex::encode(compute("sha256", &secret, &body).unwrap());
        prop_assume!(forged != real);

        let header = format!("sha256={forged}");
        prop_assert_eq!(
            verify(&secret, &body, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    /// PROPERTY: `verify` never panics on arbitrary header input.
    #[test]
    fn property_arbitrary_headers_never_panic(
        secret in secret_strategy(),
        body in body_strategy(),
        header in ".{0,128}",
    ) {
        let _ = verify(&secret, &body, Some(&header));
    }
}

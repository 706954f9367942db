//! # Secret Reveal Reconstruction
//!
//! A participant that commits to an in-value may hand every other
//! participant one Shamir share of it. If the participant then disappears
//! before revealing the in-value, any `max(1, floor(2N/3))` returned shares
//! rebuild it, so the signature chain of the next round does not depend on
//! the participant's cooperation.
//!
//! Shares are points of a random polynomial over the prime field
//! `2^521 - 1`. The x-coordinate of a share is the holder's order in the
//! round, the piece bytes are the big-endian y-coordinate.
//!
//! Despite the `encrypted_pieces` field name, this module publishes shares
//! in plaintext. Anyone who reads the header carrying them can rebuild the
//! in-value before its owner reveals it. Encrypting each piece to its
//! holder's key belongs to the signing layer that wraps this crate.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::round::Round;
use crate::types::{Hash, PublicKey};
use crate::{minimum_secret_pieces, TenureError, TenureResult};

/// Mersenne prime `2^521 - 1`.
fn field_prime() -> BigUint {
    (BigUint::one() << 521u32) - BigUint::one()
}

/// Split `secret` into one share per x-coordinate; any `threshold` of them
/// recover it.
pub fn split_secret<R: RngCore + ?Sized>(
    secret: &Hash,
    threshold: usize,
    xs: &[u32],
    rng: &mut R,
) -> TenureResult<Vec<(u32, Vec<u8>)>> {
    if threshold == 0 || threshold > xs.len() {
        return Err(TenureError::InvalidCommitment(format!(
            "threshold {threshold} for {} shares",
            xs.len()
        )));
    }
    if xs.contains(&0) {
        return Err(TenureError::InvalidCommitment(
            "share x-coordinate 0 would expose the secret".to_string(),
        ));
    }

    let prime = field_prime();
    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(BigUint::from_bytes_be(secret.as_bytes()));
    for _ in 1..threshold {
        let mut bytes = [0u8; 66];
        rng.fill_bytes(&mut bytes);
        coefficients.push(BigUint::from_bytes_be(&bytes) % &prime);
    }

    Ok(xs
        .iter()
        .map(|x| {
            let x_big = BigUint::from(*x);
            // Horner from the highest coefficient down
            let y = coefficients
                .iter()
                .rev()
                .fold(BigUint::zero(), |acc, c| (acc * &x_big + c) % &prime);
            (*x, y.to_bytes_be())
        })
        .collect())
}

/// Lagrange interpolation at zero over the first `threshold` shares.
pub fn combine_shares(shares: &[(u32, Vec<u8>)], threshold: usize) -> TenureResult<Hash> {
    if threshold == 0 || shares.len() < threshold {
        return Err(TenureError::InvalidCommitment(format!(
            "{} shares below threshold {threshold}",
            shares.len()
        )));
    }

    let prime = field_prime();
    let exponent = &prime - BigUint::from(2u32);
    let points: Vec<(BigUint, BigUint)> = shares[..threshold]
        .iter()
        .map(|(x, y)| (BigUint::from(*x), BigUint::from_bytes_be(y) % &prime))
        .collect();

    let mut secret = BigUint::zero();
    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut numerator = BigUint::one();
        let mut denominator = BigUint::one();
        for (j, (xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            if xi == xj {
                return Err(TenureError::InvalidCommitment(format!(
                    "duplicate share x-coordinate {xi}"
                )));
            }
            numerator = numerator * xj % &prime;
            denominator = denominator * ((xj + &prime - xi) % &prime) % &prime;
        }
        // Fermat inverse, the modulus is prime
        let inverse = denominator.modpow(&exponent, &prime);
        secret = (secret + yi * numerator % &prime * inverse) % &prime;
    }

    let bytes = secret.to_bytes_be();
    if bytes.len() > 32 {
        return Err(TenureError::InvalidCommitment(
            "reconstructed value exceeds 32 bytes".to_string(),
        ));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(Hash::from_bytes(out))
}

/// Rebuilds unrevealed in-values from returned shares.
pub struct SecretRevealReconstructor;

impl SecretRevealReconstructor {
    /// Shares of `in_value` for every other participant of `round`, keyed by
    /// holder, ready to be published as the owner's `encrypted_pieces`.
    ///
    /// The pieces are plaintext; encrypt them per holder before they leave
    /// the node if the in-value must stay hidden until its reveal.
    pub fn share_in_value<R: RngCore + ?Sized>(
        round: &Round,
        owner: &PublicKey,
        in_value: &Hash,
        rng: &mut R,
    ) -> TenureResult<BTreeMap<PublicKey, Vec<u8>>> {
        round.record(owner)?;
        let holders: Vec<_> = round
            .sorted_by_order()
            .into_iter()
            .filter(|r| r.public_key != *owner)
            .collect();
        if holders.is_empty() {
            return Ok(BTreeMap::new());
        }

        let threshold = minimum_secret_pieces(round.participant_count())?.min(holders.len());
        let xs: Vec<u32> = holders.iter().map(|r| r.order).collect();
        let shares = split_secret(in_value, threshold, &xs, rng)?;
        Ok(holders
            .into_iter()
            .zip(shares)
            .map(|(holder, (_, piece))| (holder.public_key.clone(), piece))
            .collect())
    }

    /// Pieces `holder` received from other participants this round, keyed by
    /// the owner of the shared value.
    pub fn pieces_held_by(round: &Round, holder: &PublicKey) -> BTreeMap<PublicKey, Vec<u8>> {
        round
            .participants
            .values()
            .filter(|r| r.public_key != *holder)
            .filter_map(|r| {
                r.encrypted_pieces
                    .get(holder)
                    .map(|piece| (r.public_key.clone(), piece.clone()))
            })
            .collect()
    }

    /// Rebuild `target`'s in-value from the pieces returned in `round`.
    ///
    /// Pieces from holders that left the participant set, or that were never
    /// handed a piece, are skipped. `None` when too few pieces remain or the
    /// result does not open `target`'s out-value.
    pub fn reconstruct(round: &Round, target: &PublicKey) -> TenureResult<Option<Hash>> {
        let Some(record) = round.get(target) else {
            debug!(participant = %target, "skipping reconstruction of departed participant");
            return Ok(None);
        };
        let Some(out_value) = record.out_value else {
            return Ok(None);
        };

        let mut shares = Vec::new();
        for (holder, piece) in &record.decrypted_pieces {
            let Some(holder_record) = round.get(holder) else {
                debug!(participant = %target, holder = %holder, "skipping piece from stale holder");
                continue;
            };
            if !record.encrypted_pieces.contains_key(holder) {
                debug!(participant = %target, holder = %holder, "skipping piece never handed out");
                continue;
            }
            shares.push((holder_record.order, piece.clone()));
        }

        let handed_out = record.encrypted_pieces.len();
        if handed_out == 0 {
            return Ok(None);
        }
        let threshold = minimum_secret_pieces(round.participant_count())?.min(handed_out);
        if shares.len() < threshold {
            return Ok(None);
        }

        let in_value = match combine_shares(&shares, threshold) {
            Ok(in_value) => in_value,
            Err(e) => {
                warn!(round = round.round_number, participant = %target, error = %e, "pieces do not combine");
                return Ok(None);
            }
        };
        if in_value.rehash() != out_value {
            warn!(
                round = round.round_number,
                participant = %target,
                "reconstructed in-value does not open the out-value"
            );
            return Ok(None);
        }
        Ok(Some(in_value))
    }

    /// Fill `previous_in_value` in `next` for every participant of `current`
    /// whose in-value can be rebuilt. Returns how many were revealed.
    pub fn reveal_into(current: &Round, next: &mut Round) -> TenureResult<usize> {
        let mut revealed = 0;
        for key in current.participants.keys() {
            let Some(next_record) = next.participants.get_mut(key) else {
                continue;
            };
            if next_record.previous_in_value.is_some() {
                continue;
            }
            if let Some(in_value) = Self::reconstruct(current, key)? {
                next_record.previous_in_value = Some(in_value);
                revealed += 1;
            }
        }
        if revealed > 0 {
            debug!(round = next.round_number, revealed, "revealed in-values from shares");
        }
        Ok(revealed)
    }
}

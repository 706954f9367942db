//! In-values a participant has committed to, and the shares it hands out.

use rand::RngCore;
use std::collections::BTreeMap;
use tracing::debug;

use tenure_consensus::{Hash, PublicKey, Round, RoundNumber, SecretRevealReconstructor, TriggerInformation};

use crate::NodeResult;

/// Remembers one in-value per round so the next round can reveal it.
///
/// Asking twice for the same round returns the same in-value, so a header
/// rebuilt after a retry still commits to the same secret.
#[derive(Debug, Clone)]
pub struct InValueKeeper {
    key: PublicKey,
    share_secrets: bool,
    in_values: BTreeMap<RoundNumber, Hash>,
}

impl InValueKeeper {
    pub fn new(key: PublicKey, share_secrets: bool) -> Self {
        Self {
            key,
            share_secrets,
            in_values: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn in_value(&self, round_number: RoundNumber) -> Option<Hash> {
        self.in_values.get(&round_number).copied()
    }

    /// Trigger for this participant's normal block in `round`: a fresh
    /// in-value, last round's in-value, shares of the new value and the
    /// pieces other participants handed to us.
    pub fn trigger<R: RngCore + ?Sized>(&mut self, round: &Round, rng: &mut R) -> NodeResult<TriggerInformation> {
        let number = round.round_number;
        let in_value = *self.in_values.entry(number).or_insert_with(|| {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            Hash::from(bytes)
        });
        let previous = number.checked_sub(1).and_then(|r| self.in_values.get(&r).copied());

        let encrypted = if self.share_secrets {
            SecretRevealReconstructor::share_in_value(round, &self.key, &in_value, rng)?
        } else {
            BTreeMap::new()
        };
        let decrypted = SecretRevealReconstructor::pieces_held_by(round, &self.key);
        if !decrypted.is_empty() {
            debug!(participant = %self.key, round = number, pieces = decrypted.len(), "returning pieces");
        }

        // Only the previous round is ever revealed
        self.in_values = self.in_values.split_off(&number.saturating_sub(1));

        Ok(TriggerInformation::new(in_value)
            .with_previous_in_value(previous)
            .with_encrypted_pieces(encrypted)
            .with_decrypted_pieces(decrypted))
    }
}

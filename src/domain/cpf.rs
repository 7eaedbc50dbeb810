//! Brazilian taxpayer id (CPF) normalization and check-digit validation.

use std::fmt;

use serde::{Deserialize, Serialize};

const CPF_LENGTH: usize = 11;

/// CPF stored as its 11 bare digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cpf(String);

impl Cpf {
    /// Strip every non-digit character. No validation is performed.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.chars().filter(char::is_ascii_digit).collect())
    }

    #[must_use]
    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Checks length, rejects repeated-digit sequences and verifies both
    /// mod-11 check digits.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.0.len() != CPF_LENGTH {
            return false;
        }

        let digits: Vec<u32> = self.0.chars().filter_map(|c| c.to_digit(10)).collect();
        if digits.windows(2).all(|w| w[0] == w[1]) {
            return false;
        }

        check_digit(&digits[..9]) == digits[9] && check_digit(&digits[..10]) == digits[10]
    }
}

fn check_digit(digits: &[u32]) -> u32 {
    let weight_start = digits.len() as u32 + 1;
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| d * (weight_start - i as u32))
        .sum();
    match 11 - (sum % 11) {
        10 | 11 => 0,
        r => r,
    }
}

/// Formats as `000.000.000-00` when the digits have the expected length.
impl fmt::Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() != CPF_LENGTH {
            return write!(f, "{}", self.0);
        }
        write!(
            f,
            "{}.{}.{}-{}",
            &self.0[0..3],
            &self.0[3..6],
            &self.0[6..9],
            &self.0[9..11]
        )
    }
}

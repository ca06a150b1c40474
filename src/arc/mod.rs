// viaseal – DKIM signing and verification with ARC sealing
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.


//! ARC (Authenticated Received Chain) validation and sealing.
//!
//! An ARC set consists of the three header fields *ARC-Authentication-Results*,
//! *ARC-Message-Signature*, and *ARC-Seal*, sharing one instance number. Each
//! intermediary that handles a message adds a new set on top of the chain.
//! The chain is validated with [`verify_chain`], and a new set is produced
//! with [`seal`].

mod auth_results;
mod seal;
mod set;
mod signature;
mod verify;

pub use auth_results::{AuthenticationResults, MethodResult};
pub use seal::{seal, SealRequest};
pub use set::{discover_arc_sets, ArcSet};
pub use signature::{ArcMessageSignature, ArcSeal};
pub use verify::{verify_chain, ArcVerificationResult, InstanceResult};

use crate::{
    error::{ValidationError, ValidationErrorKind},
    util::CanonicalStr,
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub use crate::signature::MAX_ARC_INSTANCE as MAX_INSTANCE;

/// The chain validation status, as recorded in the `cv=` tag of an ARC-Seal
/// and as the verdict of chain validation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChainValidationStatus {
    None,
    Pass,
    Fail,
}

impl CanonicalStr for ChainValidationStatus {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl Display for ChainValidationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for ChainValidationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else if s.eq_ignore_ascii_case("pass") {
            Ok(Self::Pass)
        } else if s.eq_ignore_ascii_case("fail") {
            Ok(Self::Fail)
        } else {
            Err(ValidationError::new("cv", ValidationErrorKind::InvalidValue))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_validation_status_from_str() {
        assert_eq!("Pass".parse(), Ok(ChainValidationStatus::Pass));
        assert_eq!("none".parse(), Ok(ChainValidationStatus::None));
        assert!("neutral".parse::<ChainValidationStatus>().is_err());
    }
}

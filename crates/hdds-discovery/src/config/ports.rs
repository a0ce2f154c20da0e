// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS discovery port formula.
//!
//! ```text
//! SPDP multicast = PB + DG * domain + D0
//! SPDP unicast   = PB + DG * domain + D1 + PG * participant_index
//! SEDP multicast = PB + DG * domain + DX
//! SEDP unicast   = PB + DG * domain + DY + PG * participant_index
//! ```

use super::ConfigValues;
use crate::{Error, Result};

/// Highest participant index probed when auto-assigning unicast ports.
pub const MAX_PARTICIPANT_INDEX: u16 = 120;

/// Discovery ports of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet {
    pub spdp_multicast: u16,
    pub spdp_unicast: u16,
    pub sedp_multicast: u16,
    pub sedp_unicast: u16,
}

impl ConfigValues {
    /// Ports for `domain_id` and `participant_index`, checked for u16 overflow.
    pub fn port_set(&self, domain_id: u32, participant_index: u16) -> Result<PortSet> {
        crate::trace_fn!("ConfigValues::port_set");
        let overflow = || Error::PortOverflow {
            domain_id,
            participant_index,
        };

        let base = u32::from(self.dg)
            .checked_mul(domain_id)
            .and_then(|v| v.checked_add(u32::from(self.pb)))
            .ok_or_else(overflow)?;
        let pid_offset = u32::from(self.pg) * u32::from(participant_index);

        let port = |offset: u32| -> Result<u16> {
            base.checked_add(offset)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(overflow)
        };

        Ok(PortSet {
            spdp_multicast: port(u32::from(self.d0))?,
            spdp_unicast: port(u32::from(self.d1) + pid_offset)?,
            sedp_multicast: port(u32::from(self.dx))?,
            sedp_unicast: port(u32::from(self.dy) + pid_offset)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_formula_domain0() {
        let ports = ConfigValues::default().port_set(0, 0).unwrap();
        assert_eq!(
            ports,
            PortSet {
                spdp_multicast: 7400,
                spdp_unicast: 7410,
                sedp_multicast: 7402,
                sedp_unicast: 7412,
            }
        );
    }

    #[test]
    fn test_port_formula_domain4_participant3() {
        let ports = ConfigValues::default().port_set(4, 3).unwrap();
        assert_eq!(ports.spdp_multicast, 8400);
        assert_eq!(ports.spdp_unicast, 8416);
        assert_eq!(ports.sedp_multicast, 8402);
        assert_eq!(ports.sedp_unicast, 8418);
    }

    #[test]
    fn test_port_formula_overflow() {
        let result = ConfigValues::default().port_set(300, 0);
        assert!(matches!(result, Err(Error::PortOverflow { domain_id: 300, .. })));
    }
}

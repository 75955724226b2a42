//! Canadian sales tax by shipping province.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::{Address, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Province { AB, BC, MB, NB, NL, NS, NT, NU, ON, PE, QC, SK, YT }

impl Province {
    pub const ALL: [Province; 13] = [
        Self::AB, Self::BC, Self::MB, Self::NB, Self::NL, Self::NS, Self::NT,
        Self::NU, Self::ON, Self::PE, Self::QC, Self::SK, Self::YT,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::AB => "AB", Self::BC => "BC", Self::MB => "MB", Self::NB => "NB",
            Self::NL => "NL", Self::NS => "NS", Self::NT => "NT", Self::NU => "NU",
            Self::ON => "ON", Self::PE => "PE", Self::QC => "QC", Self::SK => "SK",
            Self::YT => "YT",
        }
    }

    /// Rates in percent.
    pub fn tax_rates(&self) -> TaxRates {
        let gst = Decimal::new(5, 0);
        match self {
            Self::AB | Self::NT | Self::NU | Self::YT => TaxRates { gst, ..TaxRates::NONE },
            Self::BC | Self::MB => TaxRates { gst, pst: Decimal::new(7, 0), ..TaxRates::NONE },
            Self::SK => TaxRates { gst, pst: Decimal::new(6, 0), ..TaxRates::NONE },
            Self::QC => TaxRates { gst, qst: Decimal::new(9975, 3), ..TaxRates::NONE },
            Self::ON => TaxRates { hst: Decimal::new(13, 0), ..TaxRates::NONE },
            Self::NS => TaxRates { hst: Decimal::new(14, 0), ..TaxRates::NONE },
            Self::NB | Self::NL | Self::PE => TaxRates { hst: Decimal::new(15, 0), ..TaxRates::NONE },
        }
    }
}

impl fmt::Display for Province {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.code()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown province: {0}")]
pub struct UnknownProvince(pub String);

impl FromStr for Province {
    type Err = UnknownProvince;

    /// Accepts two-letter codes and the English or French names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', '.'], " ");
        let province = match key.as_str() {
            "ab" | "alberta" => Self::AB,
            "bc" | "british columbia" | "colombie britannique" => Self::BC,
            "mb" | "manitoba" => Self::MB,
            "nb" | "new brunswick" | "nouveau brunswick" => Self::NB,
            "nl" | "newfoundland and labrador" | "terre neuve et labrador" => Self::NL,
            "ns" | "nova scotia" | "nouvelle écosse" | "nouvelle ecosse" => Self::NS,
            "nt" | "northwest territories" | "territoires du nord ouest" => Self::NT,
            "nu" | "nunavut" => Self::NU,
            "on" | "ontario" => Self::ON,
            "pe" | "prince edward island" | "île du prince édouard" | "ile du prince edouard" => Self::PE,
            "qc" | "quebec" | "québec" => Self::QC,
            "sk" | "saskatchewan" => Self::SK,
            "yt" | "yukon" => Self::YT,
            _ => return Err(UnknownProvince(s.trim().to_string())),
        };
        Ok(province)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TaxRates { pub gst: Decimal, pub pst: Decimal, pub qst: Decimal, pub hst: Decimal }

impl TaxRates {
    pub const NONE: TaxRates = TaxRates { gst: Decimal::ZERO, pst: Decimal::ZERO, qst: Decimal::ZERO, hst: Decimal::ZERO };
    pub fn combined(&self) -> Decimal { self.gst + self.pst + self.qst + self.hst }
}

/// Tax lines as they appear on the invoice, each rounded on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown { pub gst: Money, pub pst: Money, pub qst: Money, pub hst: Money }

impl TaxBreakdown {
    pub fn total(&self) -> Money {
        Money::from_cents(self.gst.cents() + self.pst.cents() + self.qst.cents() + self.hst.cents())
    }
}

/// Where tax is owed. `None` means shipping outside Canada (zero-rated export).
pub fn jurisdiction_for(address: &Address) -> Result<Option<Province>, UnknownProvince> {
    if !address.is_canadian() { return Ok(None); }
    let province = address.province.as_deref().unwrap_or_default();
    province.parse().map(Some)
}

pub fn compute_taxes(jurisdiction: Option<Province>, taxable: &Money) -> TaxBreakdown {
    let Some(province) = jurisdiction else { return TaxBreakdown::default() };
    let rates = province.tax_rates();
    TaxBreakdown {
        gst: taxable.percent(rates.gst),
        pst: taxable.percent(rates.pst),
        qst: taxable.percent(rates.qst),
        hst: taxable.percent(rates.hst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(country: &str, province: Option<&str>) -> Address {
        Address { country: country.into(), province: province.map(Into::into), ..Default::default() }
    }

    #[test]
    fn test_quebec_gst_and_qst() {
        let taxes = compute_taxes(Some(Province::QC), &Money::from_cents(10000));
        assert_eq!(taxes.gst.cents(), 500);
        assert_eq!(taxes.qst.cents(), 998);
        assert_eq!(taxes.total().cents(), 1498);
    }

    #[test]
    fn test_hst_provinces() {
        assert_eq!(compute_taxes(Some(Province::ON), &Money::from_cents(10000)).hst.cents(), 1300);
        assert_eq!(compute_taxes(Some(Province::NS), &Money::from_cents(10000)).hst.cents(), 1400);
        assert_eq!(compute_taxes(Some(Province::PE), &Money::from_cents(10000)).total().cents(), 1500);
    }

    #[test]
    fn test_gst_only_territories() {
        for p in [Province::AB, Province::NT, Province::NU, Province::YT] {
            let taxes = compute_taxes(Some(p), &Money::from_cents(2000));
            assert_eq!(taxes.gst.cents(), 100);
            assert_eq!(taxes.total().cents(), 100);
        }
    }

    #[test]
    fn test_every_province_has_a_rate() {
        for p in Province::ALL { assert!(p.tax_rates().combined() > Decimal::ZERO, "{p}"); }
    }

    #[test]
    fn test_jurisdiction() {
        assert_eq!(jurisdiction_for(&address("ca", Some("Québec"))).unwrap(), Some(Province::QC));
        assert_eq!(jurisdiction_for(&address("CA", Some("bc"))).unwrap(), Some(Province::BC));
        assert_eq!(jurisdiction_for(&address("US", Some("NY"))).unwrap(), None);
        assert!(jurisdiction_for(&address("CA", None)).is_err());
        assert!(jurisdiction_for(&address("CA", Some("ZZ"))).is_err());
    }

    #[test]
    fn test_export_is_zero_rated() {
        assert!(compute_taxes(None, &Money::from_cents(99999)).total().is_zero());
    }
}

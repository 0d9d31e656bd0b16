use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative regions a report can be filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "Greater Accra")]
    GreaterAccra,
    Ashanti,
    Eastern,
    Western,
    #[serde(rename = "Western North")]
    WesternNorth,
    Central,
    Volta,
    Oti,
    Northern,
    Savannah,
    #[serde(rename = "North East")]
    NorthEast,
    #[serde(rename = "Upper East")]
    UpperEast,
    #[serde(rename = "Upper West")]
    UpperWest,
    Bono,
    #[serde(rename = "Bono East")]
    BonoEast,
    Ahafo,
}

impl Region {
    pub const ALL: [Region; 16] = [
        Region::GreaterAccra,
        Region::Ashanti,
        Region::Eastern,
        Region::Western,
        Region::WesternNorth,
        Region::Central,
        Region::Volta,
        Region::Oti,
        Region::Northern,
        Region::Savannah,
        Region::NorthEast,
        Region::UpperEast,
        Region::UpperWest,
        Region::Bono,
        Region::BonoEast,
        Region::Ahafo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::GreaterAccra => "Greater Accra",
            Region::Ashanti => "Ashanti",
            Region::Eastern => "Eastern",
            Region::Western => "Western",
            Region::WesternNorth => "Western North",
            Region::Central => "Central",
            Region::Volta => "Volta",
            Region::Oti => "Oti",
            Region::Northern => "Northern",
            Region::Savannah => "Savannah",
            Region::NorthEast => "North East",
            Region::UpperEast => "Upper East",
            Region::UpperWest => "Upper West",
            Region::Bono => "Bono",
            Region::BonoEast => "Bono East",
            Region::Ahafo => "Ahafo",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    /// Exact match on the display name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .iter()
            .copied()
            .find(|region| region.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display_names() {
        for region in Region::ALL {
            assert_eq!(region.as_str().parse::<Region>(), Ok(region));
        }
    }

    #[test]
    fn test_unknown_region_rejected() {
        assert!("Lagos".parse::<Region>().is_err());
        assert!("greater accra".parse::<Region>().is_err());
    }

    #[test]
    fn test_serde_uses_display_name() {
        let json = serde_json::to_string(&Region::UpperWest).unwrap();
        assert_eq!(json, "\"Upper West\"");
    }
}

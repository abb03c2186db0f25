//! Sample vectors that keep non-finite values
//!
//! JSON has no literal for NaN or infinity and serde_json writes them as
//! `null`, which then fails to read back as `f64`. Traces routinely carry NaN
//! samples, so sample vectors encode non-finite values as the strings `"NaN"`,
//! `"Infinity"` and `"-Infinity"`. A `null` read back is taken as NaN.
//!
//! Use as `#[serde(with = "samples")]` on a `Vec<f64>` field, or through
//! [`Encoded`] and [`Decoded`] for standalone JSON text.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Sample {
    Number(Option<f64>),
    Special(String),
}

impl From<f64> for Sample {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            Sample::Number(Some(v))
        } else if v.is_nan() {
            Sample::Special(NAN.to_string())
        } else if v > 0.0 {
            Sample::Special(INFINITY.to_string())
        } else {
            Sample::Special(NEG_INFINITY.to_string())
        }
    }
}

impl TryFrom<Sample> for f64 {
    type Error = String;

    fn try_from(sample: Sample) -> Result<Self, Self::Error> {
        match sample {
            Sample::Number(v) => Ok(v.unwrap_or(f64::NAN)),
            Sample::Special(text) => match text.as_str() {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                other => Err(format!("{:?} is not a sample value", other)),
            },
        }
    }
}

pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(|&v| Sample::from(v)))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    Vec::<Sample>::deserialize(deserializer)?
        .into_iter()
        .map(f64::try_from)
        .collect::<Result<_, _>>()
        .map_err(D::Error::custom)
}

/// Borrowed samples serialized with the non-finite encoding
pub struct Encoded<'a>(pub &'a [f64]);

impl Serialize for Encoded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize(self.0, serializer)
    }
}

/// Samples deserialized with the non-finite encoding
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Decoded(#[serde(deserialize_with = "deserialize")] pub Vec<f64>);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finite_values_stay_numbers() {
        let json = serde_json::to_value(Encoded(&[0.5, -2.0, 3.0])).unwrap();
        assert_eq!(json, json!([0.5, -2.0, 3.0]));
    }

    #[test]
    fn test_non_finite_values_survive_text() {
        let values = [f64::NAN, 1.0, f64::INFINITY, f64::NEG_INFINITY];
        let text = serde_json::to_string(&Encoded(&values)).unwrap();
        assert_eq!(text, r#"["NaN",1.0,"Infinity","-Infinity"]"#);

        let Decoded(back) = serde_json::from_str(&text).unwrap();
        assert!(back[0].is_nan());
        assert_eq!(&back[1..], &[1.0, f64::INFINITY, f64::NEG_INFINITY]);
    }

    #[test]
    fn test_null_reads_as_nan() {
        let Decoded(back) = serde_json::from_str("[null, 2]").unwrap();
        assert!(back[0].is_nan());
        assert_eq!(back[1], 2.0);
    }

    #[test]
    fn test_rejects_other_text_and_scalars() {
        assert!(serde_json::from_str::<Decoded>(r#"["nan?"]"#).is_err());
        assert!(serde_json::from_str::<Decoded>("0.5").is_err());
    }
}

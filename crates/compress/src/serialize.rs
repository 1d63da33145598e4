//! Configuration files and catalog documents refer to formats by name.

use crate::Compression;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};

impl Serialize for Compression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(|_| D::Error::custom(format!("unsupported compression format `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn test_serialize_by_name() {
        assert_eq!(serde_json::to_string(&Compression::Gzip).unwrap(), r#""gzip""#);
        assert_eq!(serde_json::to_string(&Compression::None).unwrap(), r#""none""#);
    }

    #[test]
    fn test_deserialize_aliases() {
        assert_eq!(serde_json::from_str::<Compression>(r#""gz""#).unwrap(), Compression::Gzip);
        assert_eq!(serde_json::from_str::<Compression>(r#""BZIP2""#).unwrap(), Compression::Bzip2);
        assert!(serde_json::from_str::<Compression>(r#""rar""#).is_err());
    }
}

//! Словари с нетекстовыми ключами.
//!
//! JSON допускает в ключах объекта только строки, поэтому словарь со
//! структурными ключами кодируется массивом пар `[[key, value], ...]`.
//! Подключается через `#[serde(with = "chanbus::codec::complex_keys")]`.

use std::marker::PhantomData;

use serde::{
    de::{SeqAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

pub fn serialize<'a, S, K, V, M>(
    map: &'a M,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    &'a M: IntoIterator<Item = (&'a K, &'a V)>,
    K: Serialize + 'a,
    V: Serialize + 'a,
{
    serializer.collect_seq(map)
}

pub fn deserialize<'de, D, K, V, M>(deserializer: D) -> Result<M, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    M: FromIterator<(K, V)>,
{
    deserializer.deserialize_seq(PairsVisitor(PhantomData))
}

struct PairsVisitor<K, V, M>(PhantomData<fn() -> (K, V, M)>);

impl<'de, K, V, M> Visitor<'de> for PairsVisitor<K, V, M>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    M: FromIterator<(K, V)>,
{
    type Value = M;

    fn expecting(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.write_str("a sequence of [key, value] pairs")
    }

    fn visit_seq<A>(
        self,
        mut seq: A,
    ) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        // Собираем лениво: промежуточный Vec не нужен.
        let mut error = None;
        let map = std::iter::from_fn(|| match seq.next_element::<(K, V)>() {
            Ok(pair) => pair,
            Err(e) => {
                error = Some(e);
                None
            }
        })
        .collect();

        match error {
            Some(e) => Err(e),
            None => Ok(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    enum Side {
        Bid,
        Ask,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Book {
        #[serde(with = "super")]
        levels: BTreeMap<(Side, u32), u64>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Hashed {
        #[serde(with = "super")]
        levels: HashMap<Side, Vec<u64>>,
    }

    #[test]
    fn test_pairs_layout() {
        let book = Book {
            levels: BTreeMap::from([((Side::Bid, 100), 5), ((Side::Ask, 101), 7)]),
        };
        let text = serde_json::to_string(&book).unwrap();
        assert_eq!(
            text,
            r#"{"levels":[[["Bid",100],5],[["Ask",101],7]]}"#
        );
        assert_eq!(serde_json::from_str::<Book>(&text).unwrap(), book);
    }

    #[test]
    fn test_hash_map_keys() {
        let value = Hashed {
            levels: HashMap::from([(Side::Ask, vec![1, 2]), (Side::Bid, vec![])]),
        };
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(serde_json::from_str::<Hashed>(&text).unwrap(), value);
    }

    #[test]
    fn test_empty_and_invalid() {
        let empty: Book = serde_json::from_str(r#"{"levels":[]}"#).unwrap();
        assert!(empty.levels.is_empty());

        assert!(serde_json::from_str::<Book>(r#"{"levels":{"a":1}}"#).is_err());
        assert!(serde_json::from_str::<Book>(r#"{"levels":[[["Bid",1]]]}"#).is_err());
        assert!(serde_json::from_str::<Book>(r#"{"levels":[[["Mid",1],2]]}"#).is_err());
    }
}

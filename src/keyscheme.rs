//! Raw-key grammar and `ObjectMap` (spec §4.2).
//!
//! `<V>#<TV>#<size>,<splitSize>#<repPolicy>#<objectKey>#<randHex>#<loc0>#...#<locL-1>`

use rand::Rng;

use crate::error::{self, Error};
use crate::policy::{DriveId, Policy, select};
use crate::split::{SplitSizes, get_split_size};

pub const CURRENT_V: u32 = 1;
pub const CURRENT_TV: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Cp,
    Rs,
}

impl Code {
    fn tag(self) -> &'static str {
        match self {
            Code::Cp => "CP",
            Code::Rs => "RS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub fragment_id: u32,
    pub uuid: DriveId,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub data: Vec<Fragment>,
    pub coding: Vec<Fragment>,
}

/// The fully-decoded raw key (spec §3 "ObjectMap aka fragments").
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMap {
    pub object_key: String,
    pub rand: u32,
    pub code: Code,
    pub k: u32,
    pub m: u32,
    pub size: u64,
    pub split_size: u64,
    pub stripe_size: u32,
    pub n_chunks: u32,
    pub data_locations: Vec<DriveId>,
    pub coding_locations: Vec<DriveId>,
    pub chunks: Vec<ChunkDescriptor>,
}

fn rep_policy_string(code: Code, k: u32, m: u32, stripe_size: u32) -> String {
    match code {
        Code::Cp => format!("CP,{k},{m}"),
        Code::Rs => format!("RS,{k},{m},{stripe_size}"),
    }
}

/// Per-fragment storage key (spec §4.2):
/// `<objectKeyPrefix<=20 chars>-<randHex>-<startOffset>-<TV>-<repPolicy>-<fragmentId>`
fn storage_key(object_key: &str, rand_hex: &str, start_offset: u64, tv: u32, rep_policy: &str, fragment_id: u32) -> String {
    let prefix: String = object_key.chars().take(20).collect();
    format!("{prefix}-{rand_hex}-{start_offset}-{tv}-{rep_policy}-{fragment_id}")
}

fn build_chunks(
    object_key: &str,
    rand_hex: &str,
    tv: u32,
    rep_policy: &str,
    n_chunks: u32,
    split_size: u64,
    data_locations: &[DriveId],
    coding_locations: &[DriveId],
) -> Vec<ChunkDescriptor> {
    (0..n_chunks)
        .map(|c| {
            let start_offset = c as u64 * split_size;
            let data = data_locations
                .iter()
                .enumerate()
                .map(|(i, uuid)| Fragment {
                    fragment_id: i as u32,
                    uuid: uuid.clone(),
                    key: storage_key(object_key, rand_hex, start_offset, tv, rep_policy, i as u32),
                })
                .collect();
            let coding = coding_locations
                .iter()
                .enumerate()
                .map(|(i, uuid)| Fragment {
                    fragment_id: data_locations.len() as u32 + i as u32,
                    uuid: uuid.clone(),
                    key: storage_key(
                        object_key,
                        rand_hex,
                        start_offset,
                        tv,
                        rep_policy,
                        data_locations.len() as u32 + i as u32,
                    ),
                })
                .collect();
            ChunkDescriptor { data, coding }
        })
        .collect()
}

/// `keygen` (spec §4.2): derives the split layout, places the object's
/// fragments once for the whole object (reused by every chunk), and
/// synthesizes every chunk descriptor.
pub fn keygen(
    policy: &Policy,
    object_key: &str,
    size: u64,
    code: Code,
    k: u32,
    m: u32,
    rand: Option<u32>,
    rng: &mut impl Rng,
) -> error::Result<ObjectMap> {
    if object_key.contains('#') || object_key.contains(',') {
        return Err(Error::key_scheme("objectKey must not contain '#' or ','"));
    }

    let SplitSizes { n_chunks, split_size, stripe_size } = get_split_size(policy.min_split_size, size, code, k);
    let selection = select(policy, k, m, rng)?;

    let rand_value = rand.unwrap_or_else(|| rng.random());
    let rand_hex = format!("{rand_value:x}");
    let rep_policy = rep_policy_string(code, k, m, stripe_size);

    let chunks = build_chunks(
        object_key,
        &rand_hex,
        CURRENT_TV,
        &rep_policy,
        n_chunks,
        split_size,
        &selection.data,
        &selection.coding,
    );

    Ok(ObjectMap {
        object_key: object_key.to_string(),
        rand: rand_value,
        code,
        k,
        m,
        size,
        split_size,
        stripe_size,
        n_chunks,
        data_locations: selection.data,
        coding_locations: selection.coding,
        chunks,
    })
}

/// `serialize` (spec §4.2).
pub fn serialize(map: &ObjectMap) -> String {
    let rep_policy = rep_policy_string(map.code, map.k, map.m, map.stripe_size);
    let mut parts = vec![
        CURRENT_V.to_string(),
        CURRENT_TV.to_string(),
        format!("{},{}", map.size, map.split_size),
        rep_policy,
        map.object_key.clone(),
        format!("{:x}", map.rand),
    ];
    parts.extend(map.data_locations.iter().cloned());
    parts.extend(map.coding_locations.iter().cloned());
    parts.join("#")
}

/// Best-effort `(k, m)` extraction from a possibly-malformed repPolicy
/// string, used only to size-check the location list before anything else
/// is parsed (spec §4.2 "wrong location count vs repPolicy" fires before
/// `splitSize`/`size` are validated).
fn lenient_km(rep_policy_raw: &str) -> (u32, u32) {
    let toks: Vec<&str> = rep_policy_raw.split(',').collect();
    match toks.first().copied() {
        Some("CP") => (
            toks.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
            toks.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
        ),
        Some("RS") => (
            toks.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
            toks.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
        ),
        _ => (0, 0),
    }
}

fn parse_rep_policy(rep_policy_raw: &str) -> error::Result<(Code, u32, u32, u32)> {
    let toks: Vec<&str> = rep_policy_raw.split(',').collect();
    match toks.as_slice() {
        ["CP", k, m] => {
            let k: u32 = k.parse().map_err(|_| Error::key_scheme(format!("invalid repPolicy {rep_policy_raw}")))?;
            let m: u32 = m.parse().map_err(|_| Error::key_scheme(format!("invalid repPolicy {rep_policy_raw}")))?;
            Ok((Code::Cp, k, m, 0))
        }
        ["RS", k, m, stripe] => {
            let k: u32 = k.parse().map_err(|_| Error::key_scheme(format!("invalid repPolicy {rep_policy_raw}")))?;
            let m: u32 = m.parse().map_err(|_| Error::key_scheme(format!("invalid repPolicy {rep_policy_raw}")))?;
            let stripe: u32 = stripe.parse().map_err(|_| Error::key_scheme(format!("invalid repPolicy {rep_policy_raw}")))?;
            Ok((Code::Rs, k, m, stripe))
        }
        [other, ..] => Err(Error::key_scheme(format!("Unknown code {other}"))),
        [] => Err(Error::key_scheme("empty repPolicy")),
    }
}

/// `deserialize` (spec §4.2). Failure-mode ordering follows the spec
/// literally: version, then topology version, then location-count-vs-
/// repPolicy, then splitSize/size numeric validation.
pub fn deserialize(raw: &str) -> error::Result<ObjectMap> {
    let parts: Vec<&str> = raw.split('#').collect();
    if parts.len() < 6 {
        return Err(Error::key_scheme(format!("missing sections: found {} parts, expected at least 6", parts.len())));
    }

    let v_str = parts[0];
    match v_str.parse::<u32>() {
        Ok(v) if (1..=CURRENT_V).contains(&v) => {}
        _ => return Err(Error::key_scheme(format!("Unknown version {v_str}"))),
    }

    let tv_str = parts[1];
    match tv_str.parse::<u32>() {
        Ok(tv) if (1..=CURRENT_TV).contains(&tv) => {}
        _ => return Err(Error::key_scheme(format!("Unknown topology version {tv_str}"))),
    }

    let rep_policy_raw = parts[3];
    let object_key = parts[4].to_string();
    let rand_hex = parts[5];
    let locations = &parts[6..];

    let (lenient_k, lenient_m) = lenient_km(rep_policy_raw);
    let expected_l = (lenient_k + lenient_m) as usize;
    if locations.len() != expected_l {
        return Err(Error::key_scheme(format!("Found {} parts, expected {}", locations.len(), rep_policy_raw)));
    }

    let size_split: Vec<&str> = parts[2].split(',').collect();
    if size_split.len() != 2 {
        return Err(Error::key_scheme(format!("invalid size/splitSize section {}", parts[2])));
    }
    let size: u64 = size_split[0]
        .parse()
        .map_err(|_| Error::key_scheme(format!("invalid size {}", size_split[0])))?;
    let split_size: u64 = size_split[1]
        .parse()
        .map_err(|_| Error::key_scheme(format!("invalid splitSize {}", size_split[1])))?;

    if split_size == 0 {
        return Err(Error::key_scheme("non-positive splitSize"));
    }
    if size < split_size {
        return Err(Error::key_scheme("size is smaller than splitSize"));
    }

    let (code, k, m, stripe_size) = parse_rep_policy(rep_policy_raw)?;

    let rand = u32::from_str_radix(rand_hex, 16).map_err(|_| Error::key_scheme(format!("invalid rand {rand_hex}")))?;

    let data_locations: Vec<DriveId> = locations[..k as usize].iter().map(|s| s.to_string()).collect();
    let coding_locations: Vec<DriveId> = locations[k as usize..].iter().map(|s| s.to_string()).collect();

    let n_chunks = size.div_ceil(split_size) as u32;
    let chunks = build_chunks(&object_key, rand_hex, CURRENT_TV, rep_policy_raw, n_chunks, split_size, &data_locations, &coding_locations);

    Ok(ObjectMap {
        object_key,
        rand,
        code,
        k,
        m,
        size,
        split_size,
        stripe_size,
        n_chunks,
        data_locations,
        coding_locations,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Affinity, FragmentClass, PolicyNode, fairness_rng};

    fn policy10() -> Policy {
        let children: Vec<PolicyNode> = (0..10)
            .map(|i| PolicyNode::Leaf { uuid: format!("drive-{i}"), affinity: Affinity::Hard, ftype: FragmentClass::Both })
            .collect();
        Policy {
            root: PolicyNode::Internal { children, weights: vec![1.0; 10], affinity: Affinity::Hard, ftype: FragmentClass::Both },
            min_split_size: 4096,
        }
    }

    #[test]
    fn s1_keygen_single_chunk_rs() {
        let policy = policy10();
        let mut rng = fairness_rng();
        let map = keygen(&policy, "testObj", 4096, Code::Rs, 2, 1, Some(0x4CB2F), &mut rng).unwrap();

        assert_eq!(map.rand, 0x4CB2F);
        assert_eq!(format!("{:x}", map.rand), "4cb2f");
        assert_eq!(map.n_chunks, 1);
        assert_eq!(map.split_size, 4096);
        assert_eq!(map.stripe_size, 4096);

        let chunk = &map.chunks[0];
        assert_eq!(chunk.data[0].key, "testObj-4cb2f-0-1-RS,2,1,4096-0");
        assert_eq!(chunk.data[1].key, "testObj-4cb2f-0-1-RS,2,1,4096-1");
        assert_eq!(chunk.coding[0].key, "testObj-4cb2f-0-1-RS,2,1,4096-2");
    }

    #[test]
    fn s2_keygen_cp_splits_into_three_chunks() {
        let mut policy = policy10();
        policy.min_split_size = 4 * 4096 - 1;
        let mut rng = fairness_rng();
        let map = keygen(&policy, "testObj", 8 * 4096 + 1, Code::Cp, 3, 0, Some(0x4CB2F), &mut rng).unwrap();

        assert_eq!(map.n_chunks, 3);
        assert_eq!(map.split_size, 16384);

        let offsets: Vec<u64> = [0u64, 16384, 32768].to_vec();
        for (c, offset) in offsets.iter().enumerate() {
            let expected = format!("testObj-4cb2f-{offset}-1-CP,3,0-0");
            assert_eq!(map.chunks[c].data[0].key, expected);
        }
    }

    #[test]
    fn s3_unknown_version() {
        let err = deserialize("gné#1#1,0#RS,2,1#obj#123#h1#h2#h3").unwrap_err();
        assert_eq!(format!("{err:?}").lines().next().unwrap(), "KeyScheme(Unknown version gné)");
    }

    #[test]
    fn s4_location_count_mismatch() {
        let err = deserialize("1#1#split#RS,4,2#obj#123#h1#h2#h3#h4#h5").unwrap_err();
        assert_eq!(format!("{err:?}").lines().next().unwrap(), "KeyScheme(Found 5 parts, expected RS,4,2)");
    }

    #[test]
    fn round_trip_cp() {
        let policy = policy10();
        let mut rng = fairness_rng();
        let map = keygen(&policy, "round-trip", 50_000, Code::Cp, 4, 0, Some(7), &mut rng).unwrap();
        let text = serialize(&map);
        let back = deserialize(&text).unwrap();
        assert_eq!(map, back);
    }

    /// Property #1: CP with nonzero `m` (extra replicated copies) must
    /// round-trip just like RS does; `m` has to survive in the repPolicy
    /// string since `deserialize` sizes the location list from it.
    #[test]
    fn round_trip_cp_with_extra_copies() {
        let policy = policy10();
        let mut rng = fairness_rng();
        let map = keygen(&policy, "round-trip-copies", 50_000, Code::Cp, 3, 2, Some(7), &mut rng).unwrap();
        assert_eq!(map.coding_locations.len(), 2);

        let text = serialize(&map);
        let back = deserialize(&text).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn round_trip_rs() {
        let policy = policy10();
        let mut rng = fairness_rng();
        let map = keygen(&policy, "round-trip-rs", 9_000_000, Code::Rs, 5, 2, Some(42), &mut rng).unwrap();
        let text = serialize(&map);
        let back = deserialize(&text).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn different_rand_yields_different_storage_keys() {
        let policy = policy10();
        let mut rng = fairness_rng();
        let map_a = keygen(&policy, "same-object", 4096, Code::Rs, 2, 1, Some(1), &mut rng).unwrap();
        let map_b = keygen(&policy, "same-object", 4096, Code::Rs, 2, 1, Some(2), &mut rng).unwrap();

        for c in 0..map_a.chunks.len() {
            for i in 0..map_a.chunks[c].data.len() {
                assert_ne!(map_a.chunks[c].data[i].key, map_b.chunks[c].data[i].key);
            }
        }
    }
}

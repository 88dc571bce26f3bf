use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cheap listing summary shared by all three kinds: the only data the diff
/// engine ever looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStub {
    pub id: String,
    pub modify_index: u64,
    pub hash: Bytes,
}

/// A replicated ACL token. Keyed by `accessor_id` everywhere; the secret is
/// payload carried along verbatim, never a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclToken {
    pub accessor_id: String,
    pub secret_id: String,
    pub description: String,
    pub policies: Vec<String>,
    pub roles: Vec<String>,
    pub local: bool,
    /// Expired tokens are still replicated; only the primary deletes them.
    pub expiration_time: Option<DateTime<Utc>>,
    pub create_index: u64,
    pub modify_index: u64,
    pub hash: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: String,
    pub datacenters: Vec<String>,
    pub create_index: u64,
    pub modify_index: u64,
    pub hash: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRole {
    pub id: String,
    pub name: String,
    pub description: String,
    pub policy_ids: Vec<String>,
    pub create_index: u64,
    pub modify_index: u64,
    pub hash: Bytes,
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_list(hasher: &mut blake3::Hasher, items: &[String]) {
    hasher.update(&(items.len() as u64).to_le_bytes());
    for item in items {
        hash_str(hasher, item);
    }
}

fn finish(hasher: blake3::Hasher) -> Bytes {
    Bytes::copy_from_slice(hasher.finalize().as_bytes())
}

impl AclToken {
    /// Digest over the content fields. Indexes and the stored hash itself
    /// stay out so that a round-trip through the log is hash-stable.
    #[must_use]
    pub fn compute_hash(&self) -> Bytes {
        let mut h = blake3::Hasher::new();
        hash_str(&mut h, &self.accessor_id);
        hash_str(&mut h, &self.secret_id);
        hash_str(&mut h, &self.description);
        hash_list(&mut h, &self.policies);
        hash_list(&mut h, &self.roles);
        h.update(&[u8::from(self.local)]);
        match self.expiration_time {
            Some(t) => {
                h.update(&t.timestamp_micros().to_le_bytes());
            }
            None => {
                h.update(&[0]);
            }
        }
        finish(h)
    }

    #[must_use]
    pub fn stub(&self) -> EntityStub {
        EntityStub {
            id: self.accessor_id.clone(),
            modify_index: self.modify_index,
            hash: self.hash.clone(),
        }
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let mut size = 144;
        size += self.accessor_id.len() + self.secret_id.len() + self.description.len();
        size += self.policies.iter().map(String::len).sum::<usize>();
        size += self.roles.iter().map(String::len).sum::<usize>();
        size + self.hash.len()
    }
}

impl AclPolicy {
    #[must_use]
    pub fn compute_hash(&self) -> Bytes {
        let mut h = blake3::Hasher::new();
        hash_str(&mut h, &self.id);
        hash_str(&mut h, &self.name);
        hash_str(&mut h, &self.description);
        hash_str(&mut h, &self.rules);
        hash_list(&mut h, &self.datacenters);
        finish(h)
    }

    #[must_use]
    pub fn stub(&self) -> EntityStub {
        EntityStub {
            id: self.id.clone(),
            modify_index: self.modify_index,
            hash: self.hash.clone(),
        }
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let mut size = 128;
        size += self.id.len() + self.name.len() + self.description.len() + self.rules.len();
        size += self.datacenters.iter().map(String::len).sum::<usize>();
        size + self.hash.len()
    }
}

impl AclRole {
    #[must_use]
    pub fn compute_hash(&self) -> Bytes {
        let mut h = blake3::Hasher::new();
        hash_str(&mut h, &self.id);
        hash_str(&mut h, &self.name);
        hash_str(&mut h, &self.description);
        hash_list(&mut h, &self.policy_ids);
        finish(h)
    }

    #[must_use]
    pub fn stub(&self) -> EntityStub {
        EntityStub {
            id: self.id.clone(),
            modify_index: self.modify_index,
            hash: self.hash.clone(),
        }
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let mut size = 128;
        size += self.id.len() + self.name.len() + self.description.len();
        size += self.policy_ids.iter().map(String::len).sum::<usize>();
        size + self.hash.len()
    }
}

use crate::error::{Error, Result};
use crate::replicator::Replicator;

/// Output of one catalogue comparison: ids to delete locally and ids whose
/// bodies must be fetched and upserted. Both lists come out id-ascending.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogueDiff {
    pub deletions: Vec<String>,
    pub updates: Vec<String>,
}

impl CatalogueDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.updates.is_empty()
    }
}

/// Linear merge over the two id-sorted summary buffers.
///
/// An id present on both sides is upserted when the content hash differs;
/// the modify index breaks ties in case of a hash collision. Duplicate ids
/// in either buffer mean the buffers cannot be trusted and the whole tick
/// is refused as corrupt.
pub fn diff_catalogues(
    r: &dyn Replicator,
    local_len: usize,
    remote_len: usize,
) -> Result<CatalogueDiff> {
    for i in 1..local_len {
        if r.local_meta(i - 1).id >= r.local_meta(i).id {
            return Err(Error::Corrupt {
                noun: r.singular_noun(),
                detail: format!("duplicate local id {:?} after sort", r.local_meta(i).id),
            });
        }
    }
    for i in 1..remote_len {
        if r.remote_meta(i - 1).id >= r.remote_meta(i).id {
            return Err(Error::Corrupt {
                noun: r.singular_noun(),
                detail: format!("duplicate remote id {:?} after sort", r.remote_meta(i).id),
            });
        }
    }

    let mut diff = CatalogueDiff::default();
    let mut li = 0;
    let mut ri = 0;

    while li < local_len && ri < remote_len {
        let local = r.local_meta(li);
        let remote = r.remote_meta(ri);

        match local.id.cmp(remote.id) {
            std::cmp::Ordering::Less => {
                diff.deletions.push(local.id.to_string());
                li += 1;
            }
            std::cmp::Ordering::Greater => {
                diff.updates.push(remote.id.to_string());
                ri += 1;
            }
            std::cmp::Ordering::Equal => {
                if local.hash != remote.hash || local.modify_index != remote.modify_index {
                    diff.updates.push(remote.id.to_string());
                }
                li += 1;
                ri += 1;
            }
        }
    }

    while li < local_len {
        diff.deletions.push(r.local_meta(li).id.to_string());
        li += 1;
    }
    while ri < remote_len {
        diff.updates.push(r.remote_meta(ri).id.to_string());
        ri += 1;
    }

    Ok(diff)
}

//! Address set diffing.

use std::cmp::Ordering;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl AddressDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Sort and deduplicate.
pub fn normalize<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = addresses.into_iter().map(Into::into).collect();
    out.sort();
    out.dedup();
    out
}

/// Linear merge of two sorted lists. Entries present in both are left out.
pub fn diff_sorted(old: &[String], new: &[String]) -> AddressDiff {
    let mut diff = AddressDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].cmp(&new[j]) {
            Ordering::Less => {
                diff.removed.push(old[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                diff.added.push(new[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    diff.removed.extend_from_slice(&old[i..]);
    diff.added.extend_from_slice(&new[j..]);
    diff
}

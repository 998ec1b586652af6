//! Singly-linked list whose links live inside the image.
//!
//! A link is two pointer cells: the payload and the next link. The head
//! is itself a link embedded in some record, with a null payload; a
//! freshly zeroed head is therefore a valid empty list. Insertion is at
//! the front only, so iteration yields payloads most-recent-first.
//! Nothing is ever unlinked.

use crate::error::{AirwalkError, Result};
use crate::image::BinaryImage;
use crate::ptr::{OffsetPtr, RelPtr};

/// Encoded size of one link: payload pointer + next pointer.
pub const LINK_SIZE: u64 = 2 * RelPtr::SIZE;

/// Alignment of link records.
pub const LINK_ALIGN: u64 = 8;

fn value_ptr(link: u64) -> RelPtr {
    RelPtr::at(link)
}

fn next_ptr(link: u64) -> RelPtr {
    RelPtr::at(link + RelPtr::SIZE)
}

/// Handle on a list head link embedded at a fixed image offset.
#[derive(Debug, Clone, Copy)]
pub struct ListHead {
    at: u64,
}

impl ListHead {
    pub fn at(offset: u64) -> Self {
        ListHead { at: offset }
    }

    /// Allocate a new link for `value` and splice it in at the front.
    ///
    /// Appends to the image; callers compound this with other appends
    /// under an [`crate::image::AppendGuard`].
    pub fn push_front(&self, image: &mut BinaryImage, value: OffsetPtr) -> Result<()> {
        let link = image.allocate(LINK_SIZE, LINK_ALIGN);
        value_ptr(link).store(image, Some(value))?;
        next_ptr(link).copy_from(image, next_ptr(self.at))?;
        next_ptr(self.at).store(image, Some(OffsetPtr::new(link)))?;
        Ok(())
    }

    pub fn is_empty(&self, image: &BinaryImage) -> Result<bool> {
        Ok(next_ptr(self.at).load(image)?.is_none())
    }

    /// Walk the list front to back, yielding payload offsets.
    pub fn iter<'a>(&self, image: &'a BinaryImage) -> ListIter<'a> {
        // A well-formed list cannot have more links than fit in the image;
        // anything longer is a pointer cycle.
        let cap = image.size() / LINK_SIZE + 1;
        ListIter {
            image,
            link: Some(self.at),
            remaining: cap,
            poisoned: false,
        }
    }

    /// Linear membership scan by payload offset.
    pub fn contains(&self, image: &BinaryImage, value: OffsetPtr) -> Result<bool> {
        for payload in self.iter(image) {
            if payload? == value {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Iterator over payload offsets; stops after the first error.
pub struct ListIter<'a> {
    image: &'a BinaryImage,
    link: Option<u64>,
    remaining: u64,
    poisoned: bool,
}

impl ListIter<'_> {
    fn step(&mut self) -> Result<Option<OffsetPtr>> {
        let link = match self.link {
            Some(link) => link,
            None => return Ok(None),
        };
        if self.remaining == 0 {
            return Err(AirwalkError::corrupt("pointer cycle in node list"));
        }
        self.remaining -= 1;

        let next = match next_ptr(link).load(self.image)? {
            Some(ptr) => ptr.offset(),
            None => {
                self.link = None;
                return Ok(None);
            }
        };
        self.link = Some(next);

        let payload = value_ptr(next).load(self.image)?.ok_or_else(|| {
            AirwalkError::corrupt(format!("list link at {next} has a null payload"))
        })?;
        Ok(Some(payload))
    }
}

impl Iterator for ListIter<'_> {
    type Item = Result<OffsetPtr>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            return None;
        }
        match self.step() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => None,
            Err(e) => {
                self.poisoned = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fixture() -> (NamedTempFile, BinaryImage, ListHead) {
        let temp = NamedTempFile::new().unwrap();
        let mut image = BinaryImage::open(temp.path(), 0).unwrap();
        let head = image.allocate(LINK_SIZE, LINK_ALIGN);
        (temp, image, ListHead::at(head))
    }

    fn collect(image: &BinaryImage, head: ListHead) -> Vec<u64> {
        head.iter(image)
            .map(|p| p.unwrap().offset())
            .collect()
    }

    #[test]
    fn test_zeroed_head_is_empty() {
        let (_t, image, head) = fixture();
        assert!(head.is_empty(&image).unwrap());
        assert_eq!(collect(&image, head), Vec::<u64>::new());
    }

    #[test]
    fn test_push_front_reverses_order() {
        let (_t, mut image, head) = fixture();
        let mut values = Vec::new();
        for _ in 0..3 {
            let v = image.allocate(8, 8);
            values.push(v);
            head.push_front(&mut image, OffsetPtr::new(v)).unwrap();
        }
        values.reverse();
        assert_eq!(collect(&image, head), values);
    }

    #[test]
    fn test_contains() {
        let (_t, mut image, head) = fixture();
        let v = image.allocate(8, 8);
        let other = image.allocate(8, 8);
        head.push_front(&mut image, OffsetPtr::new(v)).unwrap();
        assert!(head.contains(&image, OffsetPtr::new(v)).unwrap());
        assert!(!head.contains(&image, OffsetPtr::new(other)).unwrap());
    }

    #[test]
    fn test_cycle_detected() {
        let (_t, mut image, head) = fixture();
        let v = image.allocate(8, 8);
        head.push_front(&mut image, OffsetPtr::new(v)).unwrap();
        // Point the first link's next at itself.
        let first = RelPtr::at(head.at + RelPtr::SIZE)
            .load(&image)
            .unwrap()
            .unwrap();
        RelPtr::at(first.offset() + RelPtr::SIZE)
            .store(&mut image, Some(first))
            .unwrap();

        let result: Result<Vec<_>> = head.iter(&image).collect();
        assert!(matches!(result, Err(AirwalkError::Corrupt(_))));
    }

    #[test]
    fn test_survives_reload() {
        let temp = NamedTempFile::new().unwrap();
        let head_at;
        let vals: Vec<u64>;
        {
            let mut image = BinaryImage::open(temp.path(), 0).unwrap();
            head_at = image.allocate(LINK_SIZE, LINK_ALIGN);
            let head = ListHead::at(head_at);
            let a = image.allocate(8, 8);
            let b = image.allocate(8, 8);
            head.push_front(&mut image, OffsetPtr::new(a)).unwrap();
            head.push_front(&mut image, OffsetPtr::new(b)).unwrap();
            vals = vec![b, a];
            image.flush().unwrap();
        }
        let image = BinaryImage::open(temp.path(), 0).unwrap();
        assert_eq!(collect(&image, ListHead::at(head_at)), vals);
    }
}

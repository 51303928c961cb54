//! In-memory line document.
//!
//! Lines live in a generational arena and are chained in document order by
//! `prev`/`next` indices. A [`LineId`] stays valid across insertions and
//! deletions elsewhere in the document; removing a line bumps the slot
//! generation so any id still pointing at it resolves to `None` instead of
//! aliasing whatever line reuses the slot later.

use std::fmt;

/// Stable handle to a line in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Ordered, mutable sequence of text lines.
///
/// Lines never contain a newline; an empty file is the empty document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from lines in order.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut doc = Self::new();
        for line in lines {
            doc.push_back(line);
        }
        doc
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<LineId> {
        self.head.map(|index| self.id_at(index))
    }

    pub fn last(&self) -> Option<LineId> {
        self.tail.map(|index| self.id_at(index))
    }

    /// Whether `id` still refers to a live line.
    pub fn contains(&self, id: LineId) -> bool {
        self.entry(id).is_some()
    }

    pub fn get(&self, id: LineId) -> Option<&str> {
        self.entry(id).map(|entry| entry.text.as_str())
    }

    pub fn next(&self, id: LineId) -> Option<LineId> {
        self.entry(id)
            .and_then(|entry| entry.next)
            .map(|index| self.id_at(index))
    }

    pub fn prev(&self, id: LineId) -> Option<LineId> {
        self.entry(id)
            .and_then(|entry| entry.prev)
            .map(|index| self.id_at(index))
    }

    /// Replace the text of a line, returning the previous text.
    pub fn set(&mut self, id: LineId, text: impl Into<String>) -> Option<String> {
        let entry = self.entry_mut(id)?;
        Some(std::mem::replace(&mut entry.text, text.into()))
    }

    pub fn push_front(&mut self, text: impl Into<String>) -> LineId {
        let old_head = self.head;
        let index = self.allocate(text.into(), None, old_head);
        match old_head {
            Some(head) => self.link_mut(head).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.id_at(index)
    }

    pub fn push_back(&mut self, text: impl Into<String>) -> LineId {
        match self.last() {
            Some(tail) => self
                .insert_after(tail, text)
                .unwrap_or_else(|| unreachable!("tail is always live")),
            None => self.push_front(text),
        }
    }

    /// Insert a new line directly after `anchor`. Returns `None` if the
    /// anchor no longer exists.
    pub fn insert_after(&mut self, anchor: LineId, text: impl Into<String>) -> Option<LineId> {
        let anchor_next = self.entry(anchor)?.next;
        let index = self.allocate(text.into(), Some(anchor.index), anchor_next);
        self.link_mut(anchor.index).next = Some(index);
        match anchor_next {
            Some(next) => self.link_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }
        Some(self.id_at(index))
    }

    /// Insert a new line directly before `anchor`.
    pub fn insert_before(&mut self, anchor: LineId, text: impl Into<String>) -> Option<LineId> {
        match self.entry(anchor)?.prev {
            Some(prev) => {
                let prev = self.id_at(prev);
                self.insert_after(prev, text)
            }
            None => Some(self.push_front(text)),
        }
    }

    /// Unlink a line and return its text. The id (and any copy of it) is
    /// invalid afterwards.
    pub fn remove(&mut self, id: LineId) -> Option<String> {
        let (prev, next) = {
            let entry = self.entry(id)?;
            (entry.prev, entry.next)
        };
        match prev {
            Some(prev) => self.link_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.link_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let entry = slot.entry.take()?;
        self.free.push(id.index);
        self.len -= 1;
        Some(entry.text)
    }

    /// Line ids from `first` (inclusive) up to `terminator` (exclusive) or the
    /// end of the document.
    pub fn run(&self, first: Option<LineId>, terminator: Option<LineId>) -> Vec<LineId> {
        let mut ids = Vec::new();
        let mut cursor = first.filter(|id| self.contains(*id));
        while let Some(id) = cursor {
            if Some(id) == terminator {
                break;
            }
            ids.push(id);
            cursor = self.next(id);
        }
        ids
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            doc: self,
            cursor: self.head,
        }
    }

    /// Copy the lines out in document order.
    pub fn to_lines(&self) -> Vec<String> {
        self.iter().map(|(_, line)| line.to_string()).collect()
    }

    /// Compare line-for-line against a slice.
    pub fn lines_eq<S: AsRef<str>>(&self, other: &[S]) -> bool {
        self.len == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((_, line), expected)| line == expected.as_ref())
    }

    fn id_at(&self, index: u32) -> LineId {
        LineId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry(&self, id: LineId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: LineId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn link_mut(&mut self, index: u32) -> &mut Entry {
        self.slots[index as usize]
            .entry
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked slot {index} is vacant"))
    }

    fn allocate(&mut self, text: String, prev: Option<u32>, next: Option<u32>) -> u32 {
        let entry = Entry { text, prev, next };
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize].entry = Some(entry);
            return index;
        }
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("document exceeds {} lines", u32::MAX);
        });
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        index
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .iter()
                .zip(other.iter())
                .all(|((_, a), (_, b))| a == b)
    }
}

impl Eq for Document {}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, line) in self.iter() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Iterator over `(LineId, &str)` in document order.
pub struct Iter<'a> {
    doc: &'a Document,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (LineId, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let entry = self.doc.slots[index as usize].entry.as_ref()?;
        self.cursor = entry.next;
        Some((self.doc.id_at(index), entry.text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lines_preserves_order() {
        let doc = Document::from_lines(["a", "b", "c"]);
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.to_lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ids_survive_insertion_elsewhere() {
        let mut doc = Document::from_lines(["a", "c"]);
        let a = doc.first().unwrap();
        let c = doc.last().unwrap();
        let b = doc.insert_after(a, "b").unwrap();
        doc.push_front("start");
        doc.push_back("end");

        assert_eq!(doc.get(a), Some("a"));
        assert_eq!(doc.get(b), Some("b"));
        assert_eq!(doc.get(c), Some("c"));
        assert_eq!(doc.next(a), Some(b));
        assert_eq!(doc.prev(c), Some(b));
        assert_eq!(doc.to_lines(), vec!["start", "a", "b", "c", "end"]);
    }

    #[test]
    fn test_remove_invalidates_only_removed_id() {
        let mut doc = Document::from_lines(["a", "b", "c"]);
        let a = doc.first().unwrap();
        let b = doc.next(a).unwrap();
        let c = doc.last().unwrap();

        assert_eq!(doc.remove(b), Some("b".to_string()));
        assert!(!doc.contains(b));
        assert_eq!(doc.get(b), None);
        assert_eq!(doc.next(a), Some(c));
        assert_eq!(doc.prev(c), Some(a));

        // Reused slot must not resurrect the stale id.
        let d = doc.push_back("d");
        assert_ne!(d, b);
        assert_eq!(doc.get(b), None);
        assert_eq!(doc.to_lines(), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut doc = Document::from_lines(["a", "b", "c"]);
        let head = doc.first().unwrap();
        let tail = doc.last().unwrap();
        doc.remove(head);
        doc.remove(tail);
        assert_eq!(doc.to_lines(), vec!["b"]);
        assert_eq!(doc.first(), doc.last());

        let only = doc.first().unwrap();
        doc.remove(only);
        assert!(doc.is_empty());
        assert_eq!(doc.first(), None);
        assert_eq!(doc.last(), None);
    }

    #[test]
    fn test_insert_before_head() {
        let mut doc = Document::from_lines(["b"]);
        let b = doc.first().unwrap();
        doc.insert_before(b, "a");
        assert_eq!(doc.to_lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_run_stops_at_terminator() {
        let doc = Document::from_lines(["a", "b", "c", "d"]);
        let ids: Vec<_> = doc.iter().map(|(id, _)| id).collect();
        let run = doc.run(Some(ids[1]), Some(ids[3]));
        assert_eq!(run, vec![ids[1], ids[2]]);
        assert_eq!(doc.run(Some(ids[2]), None), vec![ids[2], ids[3]]);
        assert!(doc.run(None, None).is_empty());
    }

    #[test]
    fn test_set_returns_previous_text() {
        let mut doc = Document::from_lines(["old"]);
        let id = doc.first().unwrap();
        assert_eq!(doc.set(id, "new"), Some("old".to_string()));
        assert_eq!(doc.get(id), Some("new"));
    }

    #[test]
    fn test_equality_ignores_arena_layout() {
        let mut left = Document::from_lines(["x", "a", "b"]);
        let x = left.first().unwrap();
        left.remove(x);
        let right = Document::from_lines(["a", "b"]);
        assert_eq!(left, right);
        assert!(left.lines_eq(&["a", "b"]));
        assert_eq!(right.to_string(), "a\nb\n");
    }
}

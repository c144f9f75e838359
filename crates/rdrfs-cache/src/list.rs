//! Arena-backed doubly-linked list with stable handles.
//!
//! Used for a directory's enumeration order and for a volume's flat object
//! list. Links are slot indices, so removal is index rewiring; a handle
//! carries the slot generation and goes stale once its value is removed.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
    generation: u64,
}

#[derive(Debug)]
pub struct EntryList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> EntryList<T> {
    pub fn new() -> Self {
        EntryList {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_back(&mut self, value: T) -> ListHandle {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.value = Some(value);
                slot.prev = self.tail;
                slot.next = None;
                index
            }
            None => {
                self.slots.push(Slot {
                    value: Some(value),
                    prev: self.tail,
                    next: None,
                    generation: 0,
                });
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        ListHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    fn is_live(&self, handle: ListHandle) -> bool {
        self.slots
            .get(handle.index)
            .map(|slot| slot.generation == handle.generation && slot.value.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, handle: ListHandle) -> Option<&T> {
        if !self.is_live(handle) {
            return None;
        }
        self.slots[handle.index].value.as_ref()
    }

    /// Unlinks the value behind `handle`; a stale handle returns `None`.
    pub fn remove(&mut self, handle: ListHandle) -> Option<T> {
        if !self.is_live(handle) {
            return None;
        }
        let (prev, next) = {
            let slot = &self.slots[handle.index];
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        let slot = &mut self.slots[handle.index];
        slot.prev = None;
        slot.next = None;
        slot.generation += 1;
        let value = slot.value.take();
        self.free.push(handle.index);
        self.len -= 1;
        value
    }

    /// Removes every value, returning them in list order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &mut self.slots[index];
            cursor = slot.next;
            slot.prev = None;
            slot.next = None;
            slot.generation += 1;
            if let Some(value) = slot.value.take() {
                out.push(value);
            }
            self.free.push(index);
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
        out
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a EntryList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (ListHandle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.list.slots[index];
        self.cursor = slot.next;
        slot.value.as_ref().map(|value| {
            (
                ListHandle {
                    index,
                    generation: slot.generation,
                },
                value,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: &EntryList<u32>) -> Vec<u32> {
        list.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn test_push_preserves_order() {
        let mut list = EntryList::new();
        list.push_back(1);
        list.push_back(2);
        list.push_back(3);
        assert_eq!(values(&list), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut list = EntryList::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        assert_eq!(list.remove(b), Some(2));
        assert_eq!(values(&list), vec![1, 3]);
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(values(&list), vec![3]);
        assert_eq!(list.remove(c), Some(3));
        assert!(list.is_empty());
        assert_eq!(values(&list), Vec::<u32>::new());
    }

    #[test]
    fn test_stale_handle_after_remove() {
        let mut list = EntryList::new();
        let a = list.push_back(1);
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(a), None);
        assert!(list.get(a).is_none());
    }

    #[test]
    fn test_slot_reuse_does_not_revive_old_handle() {
        let mut list = EntryList::new();
        let a = list.push_back(1);
        list.remove(a);
        let b = list.push_back(2);
        assert!(list.get(a).is_none());
        assert_eq!(list.get(b), Some(&2));
        assert_eq!(values(&list), vec![2]);
    }

    #[test]
    fn test_drain() {
        let mut list = EntryList::new();
        let a = list.push_back(1);
        list.push_back(2);
        list.push_back(3);
        assert_eq!(list.drain(), vec![1, 2, 3]);
        assert!(list.is_empty());
        assert!(list.get(a).is_none());
        list.push_back(4);
        assert!(list.get(a).is_none());
        assert_eq!(values(&list), vec![4]);
    }

    #[test]
    fn test_handles_from_iter_remove_correctly() {
        let mut list = EntryList::new();
        for i in 0..6 {
            list.push_back(i);
        }
        let odd: Vec<ListHandle> = list
            .iter()
            .filter(|(_, v)| **v % 2 == 1)
            .map(|(h, _)| h)
            .collect();
        for handle in odd {
            list.remove(handle);
        }
        assert_eq!(values(&list), vec![0, 2, 4]);
    }
}

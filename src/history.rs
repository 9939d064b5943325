//! Fixed-capacity ring of recent values, used as the per-channel message
//! history.
//!
//! The ring pre-allocates every slot up front so the append path never
//! branches on emptiness. The cost moves to the iterators: `do_walk` and its
//! derivatives visit all `size` slots, including ones that still hold the
//! default, so the default must keep every field a predicate touches safe to
//! read. Not a good fit for short-lived windows; once values start rotating
//! the per-append and per-scan cost is a flat O(1)/O(size).

/// Rotating window over the last `size` appended values.
#[derive(Debug)]
pub struct RingHistory<V> {
    slots: Vec<V>,
    /// Index of the most recently written slot.
    last: usize,
}

impl<V: Clone> RingHistory<V> {
    /// Allocate all `size` slots, each holding a clone of `default`.
    ///
    /// Panics if `size` is zero; a zero-slot history cannot hold a window.
    pub fn new(size: usize, default: V) -> Self {
        assert!(size > 0, "ring history needs at least one slot");
        Self {
            slots: vec![default; size],
            last: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Overwrite the oldest slot with `val` and make it the newest. O(1).
    pub fn append(&mut self, val: V) {
        self.last = (self.last + 1) % self.slots.len();
        self.slots[self.last] = val;
    }

    /// Visit every slot most-recent-first as `(slot, index)`. Returning true
    /// from `f` stops the walk.
    ///
    /// Slots are handed out mutably so callers can flag values in the same
    /// pass that selects them.
    pub fn do_walk<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut V, usize) -> bool,
    {
        let n = self.slots.len();
        for i in 0..n {
            let idx = (self.last + n - i) % n;
            if f(&mut self.slots[idx], i) {
                return;
            }
        }
    }

    /// First value matching `pred` in most-recent-first order.
    pub fn find<P>(&mut self, mut pred: P) -> Option<V>
    where
        P: FnMut(&mut V) -> bool,
    {
        let mut found = None;
        self.do_walk(|val, _| {
            if pred(val) {
                found = Some(val.clone());
                return true;
            }
            false
        });
        found
    }

    /// All values matching `pred`, most-recent-first.
    pub fn filter<P>(&mut self, mut pred: P) -> Vec<V>
    where
        P: FnMut(&mut V) -> bool,
    {
        let mut out = Vec::new();
        self.do_walk(|val, _| {
            if pred(val) {
                out.push(val.clone());
            }
            false
        });
        out
    }

    /// Snapshot of all `size` slots, most-recent-first.
    pub fn all(&self) -> Vec<V> {
        let n = self.slots.len();
        (0..n).map(|i| self.slots[(self.last + n - i) % n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_of_defaults() {
        let ring: RingHistory<i32> = RingHistory::new(5, 0);
        assert_eq!(ring.all(), vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn partial_fill_pads_with_the_default() {
        let mut ring = RingHistory::new(5, 0);
        ring.append(10);
        ring.append(20);
        assert_eq!(ring.all(), vec![20, 10, 0, 0, 0]);
    }

    #[test]
    fn windowed_values_rotate_most_recent_first() {
        let mut ring = RingHistory::new(5, 0);
        for v in [10, 20, 30, 40, 50] {
            ring.append(v);
        }
        assert_eq!(ring.all(), vec![50, 40, 30, 20, 10]);

        let cases = [
            (60, vec![60, 50, 40, 30, 20]),
            (70, vec![70, 60, 50, 40, 30]),
            (80, vec![80, 70, 60, 50, 40]),
            (90, vec![90, 80, 70, 60, 50]),
        ];
        for (input, want) in cases {
            ring.append(input);
            assert_eq!(ring.all(), want, "after appending {input}");
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Msg {
        val: i32,
        user: &'static str,
        id: &'static str,
    }

    fn seeded() -> RingHistory<Msg> {
        let mut ring = RingHistory::new(
            15,
            Msg {
                val: 0,
                user: "",
                id: "",
            },
        );
        let msgs = [
            (10, "aaa", "1"),
            (20, "bbb", "2"),
            (30, "ccc", "3"),
            (40, "aaa", "4"),
            (50, "aaa", "5"),
            (60, "ccc", "6"),
            (70, "ccc", "7"),
            (50, "mmm", "4b"),
            (80, "ccc", "8"),
            (90, "ddd", "9"),
            (100, "ddd", "10"),
        ];
        for (val, user, id) in msgs {
            ring.append(Msg { val, user, id });
        }
        ring
    }

    #[test]
    fn filter_preserves_most_recent_first_order() {
        let mut ring = seeded();
        let got: Vec<i32> = ring.filter(|m| m.user == "ccc").iter().map(|m| m.val).collect();
        assert_eq!(got, vec![80, 70, 60, 30]);

        // Filter order agrees with the order the same values hold in all().
        let all_ccc: Vec<i32> = ring
            .all()
            .into_iter()
            .filter(|m| m.user == "ccc")
            .map(|m| m.val)
            .collect();
        assert_eq!(got, all_ccc);
    }

    #[test]
    fn find_returns_first_filter_element() {
        let mut ring = seeded();
        let found = ring.find(|m| m.user == "aaa");
        let filtered = ring.filter(|m| m.user == "aaa");
        assert_eq!(found.as_ref(), filtered.first());
        assert_eq!(found.unwrap().val, 50);

        assert_eq!(ring.find(|m| m.user == "nobody"), None);
    }

    #[test]
    fn predicates_may_mutate_in_place() {
        let mut ring = RingHistory::new(3, Msg { val: 0, user: "", id: "" });
        ring.append(Msg { val: 1, user: "aaa", id: "1" });
        ring.append(Msg { val: 2, user: "aaa", id: "2" });

        let taken = ring.filter(|m| {
            if m.user == "aaa" && m.val > 0 {
                m.val = -m.val;
                return true;
            }
            false
        });
        assert_eq!(taken.len(), 2);
        // Marked in place: a second identical pass matches nothing.
        assert!(ring.filter(|m| m.user == "aaa" && m.val > 0).is_empty());
    }

    #[test]
    fn do_walk_stops_on_true() {
        let mut ring = RingHistory::new(4, 0);
        for v in [1, 2, 3, 4] {
            ring.append(v);
        }
        let mut visited = Vec::new();
        ring.do_walk(|v, i| {
            visited.push((*v, i));
            *v == 3
        });
        assert_eq!(visited, vec![(4, 0), (3, 1)]);
    }
}

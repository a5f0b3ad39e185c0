//! Fractional sibling ordering
//!
//! Siblings are ordered by ascending `position`. New positions are chosen in
//! the gaps between neighbours so that inserting or reordering one node never
//! rewrites its siblings. Repeated inserts at the same spot halve the gap each
//! time; once it drops below a minimum the group is rebalanced to even spacing.

/// Where to place a node among its (sorted) siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Zero-based target index; indexes past the end behave like `Append`
    Index(usize),
    /// After the last sibling
    Append,
}

/// Calculates the fractional order for inserting a node between two siblings
pub struct FractionalOrderCalculator;

impl FractionalOrderCalculator {
    /// Calculate order value for inserting between prev and next
    ///
    /// # Examples
    /// ```
    /// use folio_core::db::FractionalOrderCalculator;
    ///
    /// // First child
    /// assert_eq!(FractionalOrderCalculator::calculate_order(None, None, 10000.0), 10000.0);
    /// // Before first
    /// assert_eq!(FractionalOrderCalculator::calculate_order(None, Some(10000.0), 10000.0), 5000.0);
    /// // After last
    /// assert_eq!(FractionalOrderCalculator::calculate_order(Some(30000.0), None, 10000.0), 40000.0);
    /// // Between siblings
    /// assert_eq!(FractionalOrderCalculator::calculate_order(Some(1.0), Some(2.0), 10000.0), 1.5);
    /// ```
    pub fn calculate_order(prev_order: Option<f64>, next_order: Option<f64>, gap: f64) -> f64 {
        match (prev_order, next_order) {
            (None, None) => gap,                             // First child
            (None, Some(next)) => next / 2.0,                // Before first
            (Some(prev), None) => prev + gap,                // After last
            (Some(prev), Some(next)) => (prev + next) / 2.0, // Between siblings
        }
    }

    /// Neighbours of the slot a node would occupy at `at`
    pub fn neighbours(siblings: &[f64], at: InsertAt) -> (Option<f64>, Option<f64>) {
        let index = match at {
            InsertAt::Index(i) if i < siblings.len() => i,
            _ => siblings.len(),
        };
        let prev = index.checked_sub(1).map(|i| siblings[i]);
        let next = siblings.get(index).copied();
        (prev, next)
    }

    /// Position for a node placed at `at` among sorted `siblings`
    ///
    /// `siblings` must exclude the node being placed.
    pub fn compute_insert_position(siblings: &[f64], at: InsertAt, gap: f64) -> f64 {
        let (prev, next) = Self::neighbours(siblings, at);
        Self::calculate_order(prev, next, gap)
    }

    /// Whether `position` sits too close to its neighbours to be stored safely
    ///
    /// A position at or below zero is also rejected: halving the first
    /// sibling's position can only approach zero.
    pub fn is_too_close(prev: Option<f64>, next: Option<f64>, position: f64, min_gap: f64) -> bool {
        if prev.is_none() && position <= 0.0 {
            return true;
        }
        let below = prev.map_or(false, |p| position - p < min_gap);
        let above = next.map_or(false, |n| n - position < min_gap);
        below || above
    }

    /// Check if rebalancing is needed (gap too small)
    pub fn needs_rebalancing(orders: &[f64], min_gap: f64) -> bool {
        orders.windows(2).any(|pair| pair[1] - pair[0] < min_gap)
    }

    /// Rebalance orders to have even spacing
    ///
    /// # Example
    /// Input:  [1.0, 1.0001, 1.0002, 1.0003] with gap 10000
    /// Output: [10000.0, 20000.0, 30000.0, 40000.0]
    pub fn rebalance(count: usize, gap: f64) -> Vec<f64> {
        (1..=count).map(|i| i as f64 * gap).collect()
    }

    /// Positions that occur more than once in a sorted list
    pub fn find_ties(orders: &[f64]) -> Vec<f64> {
        let mut ties: Vec<f64> = Vec::new();
        for pair in orders.windows(2) {
            if pair[0] == pair[1] && ties.last() != Some(&pair[0]) {
                ties.push(pair[0]);
            }
        }
        ties
    }
}

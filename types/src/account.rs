use serde::{Deserialize, Serialize};

/// A participant's balance sheet as kept by the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub xp: u64,
    pub level: u32,
    pub tokens: u64,
}

impl Account {
    pub fn credit(&mut self, amount: u64) {
        self.tokens = self.tokens.saturating_add(amount);
    }

    /// Removes `amount` tokens; leaves the account untouched when it cannot cover it.
    pub fn debit(&mut self, amount: u64) -> bool {
        match self.tokens.checked_sub(amount) {
            Some(remaining) => {
                self.tokens = remaining;
                true
            }
            None => false,
        }
    }

    /// Adds experience and returns `(leveled_up, level)`. Levels never go down.
    pub fn add_experience(&mut self, xp: u64) -> (bool, u32) {
        self.xp = self.xp.saturating_add(xp);
        let level = level_for_xp(self.xp);
        if level > self.level {
            self.level = level;
            return (true, level);
        }
        (false, self.level)
    }
}

/// `floor(xp^0.25)`.
pub fn level_for_xp(xp: u64) -> u32 {
    let mut level = (xp as f64).powf(0.25).floor() as u64;
    // Correct float drift around perfect fourth powers; an overflowing power is above any xp.
    while level > 0 && level.checked_pow(4).map_or(true, |power| power > xp) {
        level -= 1;
    }
    while (level + 1).checked_pow(4).is_some_and(|power| power <= xp) {
        level += 1;
    }
    level as u32
}

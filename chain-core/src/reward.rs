//! Block reward halving schedule (§4.3 Block Template Builder).

use crate::transaction::COIN;
use crate::Satoshis;

const INITIAL_REWARD: Satoshis = 50 * COIN;
const HALVING_INTERVAL: u64 = 210_000;
const MAX_HALVINGS: u32 = 64;

/// Reward in satoshis paid to the coinbase of the block at `height`.
pub fn reward_at_height(height: u64) -> Satoshis {
    let halvings = (height / HALVING_INTERVAL) as u32;
    if halvings >= MAX_HALVINGS {
        return 0;
    }
    INITIAL_REWARD >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_era_reward_is_fifty_coin() {
        assert_eq!(reward_at_height(0), 50 * COIN);
        assert_eq!(reward_at_height(209_999), 50 * COIN);
    }

    #[test]
    fn halves_on_schedule() {
        assert_eq!(reward_at_height(210_000), 25 * COIN);
        assert_eq!(reward_at_height(420_000), 12 * COIN + COIN / 2);
    }

    #[test]
    fn zero_beyond_max_halvings() {
        assert_eq!(reward_at_height(210_000 * 64), 0);
        assert_eq!(reward_at_height(210_000 * 100), 0);
    }
}

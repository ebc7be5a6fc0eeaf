//! Combat system - beam heat, damage and score

/// Weapon heat state for one avatar
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeatState {
    /// Accumulated heat in firing ticks, 0.0 = cold
    pub fire_ticks: f64,
    pub is_shooting: bool,
    pub overheat: bool,
    /// Simulation time at which `overheat` was last set
    pub overheat_since: Option<f64>,
}

/// Heat accumulation and cooldown with overheat hysteresis.
///
/// Heat is counted in whole firing ticks, so continuous fire from cold
/// reaches exactly full after `heat_time` worth of ticks.
#[derive(Debug, Clone, Copy)]
pub struct HeatModel {
    /// Firing ticks from cold to full
    ticks_to_overheat: f64,
    /// Heat shed per non-firing tick, in firing ticks
    cool_per_tick: f64,
    /// Seconds to cool from full to cold
    cool_time: f32,
}

impl HeatModel {
    /// `heat_time` is rounded to a whole number of `dt` ticks
    pub fn new(heat_time: f32, cool_time: f32, dt: f32) -> Self {
        let ticks_to_overheat = (heat_time as f64 / dt as f64).round().max(1.0);
        Self {
            ticks_to_overheat,
            cool_per_tick: ticks_to_overheat * dt as f64 / cool_time as f64,
            cool_time,
        }
    }

    /// Normalized heat, 1.0 = full
    pub fn heat_level(&self, state: &HeatState) -> f32 {
        (state.fire_ticks / self.ticks_to_overheat) as f32
    }

    /// Advance heat by one tick ending at simulation time `now`
    pub fn advance(&self, state: HeatState, now: f64) -> HeatState {
        let mut next = state;

        if next.is_shooting {
            next.fire_ticks += 1.0;
            if next.fire_ticks >= self.ticks_to_overheat {
                next.fire_ticks = self.ticks_to_overheat;
                next.overheat = true;
                next.is_shooting = false;
                next.overheat_since = Some(now);
            }
        } else if next.fire_ticks > 0.0 {
            next.fire_ticks = (next.fire_ticks - self.cool_per_tick).max(0.0);
        }

        // Overheat only releases after half the cool time, even if heat already hit 0
        if next.overheat {
            let since = next.overheat_since.unwrap_or(now);
            if now - since >= self.cool_time as f64 * 0.5 {
                next.overheat = false;
                next.overheat_since = None;
            }
        }

        next
    }

    /// Server-side check for a start-shooting request
    pub fn can_start_shooting(heat: f32) -> bool {
        heat < 1.0
    }
}

/// Combat helpers for damage and score
pub struct CombatSystem;

impl CombatSystem {
    /// Beam damage for one tick of contact
    pub fn beam_damage(damage_rate: f32, dt: f32) -> f32 {
        damage_rate * dt
    }

    /// Score awarded for dealing `damage`
    pub fn score_for(damage: f32, score_per_damage: f32) -> f32 {
        damage * score_per_damage
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }
}

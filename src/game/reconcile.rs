//! Per-tick movement and combat reconciliation

use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info};

use super::authority::Endpoint;
use super::combat::{CombatSystem, HeatModel, HeatState};
use super::entity::{Entity, EntityId, EntityKind, SpawnSpec};
use super::physics::{PhysicsSystem, Vec3};
use super::world::World;

impl World {
    /// Run one simulation tick of length `dt` ending at simulation time `now`
    pub fn tick(&mut self, dt: f32, now: f64) {
        self.process_scheduled_despawns(now);

        if self.settings.enemy_spawning {
            self.spawn_enemies(now);
        }

        self.update_enemies(dt);
        self.update_avatars(dt, now);
        self.resolve_collisions(now);
    }

    /// Spawn an enemy at the far edge whenever the spawn timer comes due
    fn spawn_enemies(&mut self, now: f64) {
        if now < self.next_enemy_spawn {
            return;
        }

        let half_width = self.settings.arena_half_width;
        let x = self.rng.gen_range(-half_width..=half_width);
        let speed = self
            .rng
            .gen_range(self.settings.enemy_speed_min..=self.settings.enemy_speed_max);
        let interval = self
            .rng
            .gen_range(self.settings.enemy_spawn_min..=self.settings.enemy_spawn_max);

        self.spawn(
            Endpoint::Server,
            SpawnSpec::Enemy {
                position: Vec3::new(x, 0.0, self.settings.enemy_spawn_z),
                heading: Vec3::BACK,
                speed,
            },
        );
        self.next_enemy_spawn = now + interval;
    }

    /// Drift living enemies and remove the ones that left the arena
    fn update_enemies(&mut self, dt: f32) {
        let exit_z = self.settings.enemy_exit_z;
        let mut exited = Vec::new();

        for entity in self.entities.values_mut() {
            if !entity.is_active() {
                continue;
            }
            let id = entity.id;
            let Some(enemy) = entity.as_enemy_mut() else {
                continue;
            };
            if !enemy.is_alive() {
                continue;
            }

            let next = PhysicsSystem::drift(*enemy.position.get(), enemy.heading, enemy.speed, dt);
            enemy.position.write(next, &mut self.outbox);
            if next.z < exit_z {
                exited.push(id);
            }
        }

        for id in exited {
            debug!(entity_id = %id, "Enemy left the arena");
            self.despawn(id);
        }
    }

    fn update_avatars(&mut self, dt: f32, now: f64) {
        let avatar_ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_active() && e.kind() == EntityKind::Avatar)
            .map(|e| e.id)
            .collect();

        for id in avatar_ids {
            self.update_avatar(id, dt, now);
        }
    }

    fn update_avatar(&mut self, id: EntityId, dt: f32, now: f64) {
        let Some(avatar) = self.entities.get(&id).and_then(Entity::as_avatar) else {
            return;
        };
        // Dead or orphaned ships sit out until their despawn
        let Some(controller_id) = *avatar.controller.get() else {
            return;
        };

        if *avatar.health.get() <= 0.0 {
            self.kill_avatar(id, controller_id, now);
            return;
        }

        let Some(target) = self
            .entities
            .get(&controller_id)
            .and_then(Entity::as_controller)
            .map(|c| *c.position.get())
        else {
            debug!(entity_id = %id, controller = %controller_id, "Avatar bound to missing controller");
            return;
        };

        let was_shooting = *avatar.is_shooting.get();
        let heading = avatar.heading;
        let next_position = PhysicsSystem::step_toward(
            *avatar.position.get(),
            target,
            self.settings.move_speed * dt,
        );
        let heat_model = HeatModel::new(self.settings.heat_time, self.settings.cool_time, dt);
        let heat = heat_model.advance(
            HeatState {
                fire_ticks: avatar.fire_ticks,
                is_shooting: was_shooting,
                overheat: *avatar.overheat.get(),
                overheat_since: avatar.overheat_since,
            },
            now,
        );

        if let Some(avatar) = self.entities.get_mut(&id).and_then(Entity::as_avatar_mut) {
            avatar.position.set_if_changed(next_position, &mut self.outbox);
            avatar.fire_ticks = heat.fire_ticks;
            avatar
                .heat_level
                .set_if_changed(heat_model.heat_level(&heat), &mut self.outbox);
            avatar.is_shooting.set_if_changed(heat.is_shooting, &mut self.outbox);
            if avatar.overheat.set_if_changed(heat.overheat, &mut self.outbox) && heat.overheat {
                debug!(entity_id = %id, "Weapon overheated");
            }
            avatar.overheat_since = heat.overheat_since;
        }

        if was_shooting {
            self.resolve_beam(controller_id, next_position, heading, dt, now);
        }
    }

    /// Damage every living enemy on the beam and credit the shooter's controller
    fn resolve_beam(
        &mut self,
        controller_id: EntityId,
        origin: Vec3,
        heading: Vec3,
        dt: f32,
        now: f64,
    ) {
        let damage = CombatSystem::beam_damage(self.settings.beam_damage_rate, dt);
        let range = self.settings.beam_range;
        let radius = self.settings.enemy_radius;

        let mut dealt = 0.0;
        let mut killed = Vec::new();

        for entity in self.entities.values_mut() {
            if !entity.is_active() {
                continue;
            }
            let enemy_id = entity.id;
            let Some(enemy) = entity.as_enemy_mut() else {
                continue;
            };
            if !enemy.is_alive()
                || !PhysicsSystem::ray_hits_sphere(origin, heading, range, *enemy.position.get(), radius)
            {
                continue;
            }

            let (health, dead) = CombatSystem::apply_damage(*enemy.health.get(), damage);
            enemy.health.write(health, &mut self.outbox);
            dealt += damage;

            if dead && !enemy.dying {
                enemy.dying = true;
                killed.push(enemy_id);
            }
        }

        for enemy_id in killed {
            info!(entity_id = %enemy_id, controller = %controller_id, "Enemy destroyed");
            self.schedule_despawn(enemy_id, self.settings.enemy_despawn_delay, now);
        }

        if dealt > 0.0 {
            let gained = CombatSystem::score_for(dealt, self.settings.score_per_damage);
            if let Some(controller) = self
                .entities
                .get_mut(&controller_id)
                .and_then(Entity::as_controller_mut)
            {
                let score = *controller.score.get() + gained;
                controller.score.write(score, &mut self.outbox);
            }
        }
    }

    /// Apply collision damage when an avatar first touches a living enemy
    fn resolve_collisions(&mut self, now: f64) {
        let enemies: Vec<(EntityId, Vec3)> = self
            .entities
            .values()
            .filter(|e| e.is_active())
            .filter_map(|e| {
                e.as_enemy()
                    .filter(|enemy| enemy.is_alive())
                    .map(|enemy| (e.id, *enemy.position.get()))
            })
            .collect();

        let avatar_ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_active())
            .filter(|e| e.as_avatar().is_some_and(|a| *a.health.get() > 0.0))
            .map(|e| e.id)
            .collect();

        let avatar_radius = self.settings.avatar_radius;
        let enemy_radius = self.settings.enemy_radius;
        let collision_damage = self.settings.collision_damage;

        for id in avatar_ids {
            let Some(avatar) = self.entities.get_mut(&id).and_then(Entity::as_avatar_mut) else {
                continue;
            };
            let position = *avatar.position.get();

            let touching: HashSet<EntityId> = enemies
                .iter()
                .filter(|(_, p)| PhysicsSystem::spheres_overlap(position, avatar_radius, *p, enemy_radius))
                .map(|(enemy_id, _)| *enemy_id)
                .collect();
            let entered = touching.difference(&avatar.contacts).count();
            avatar.contacts = touching;

            if entered == 0 {
                continue;
            }

            let (health, dead) =
                CombatSystem::apply_damage(*avatar.health.get(), collision_damage * entered as f32);
            avatar.health.write(health, &mut self.outbox);
            debug!(entity_id = %id, health, "Avatar hit by enemy");

            let controller = *avatar.controller.get();
            if dead {
                if let Some(controller_id) = controller {
                    self.kill_avatar(id, controller_id, now);
                }
            }
        }
    }

    /// Clear both sides of the binding and schedule the wreck for removal
    fn kill_avatar(&mut self, avatar_id: EntityId, controller_id: EntityId, now: f64) {
        if let Some(avatar) = self.entities.get_mut(&avatar_id).and_then(Entity::as_avatar_mut) {
            avatar.controller.write(None, &mut self.outbox);
            avatar.is_shooting.set_if_changed(false, &mut self.outbox);
        }

        if let Some(controller) = self
            .entities
            .get_mut(&controller_id)
            .and_then(Entity::as_controller_mut)
        {
            if *controller.avatar.get() == Some(avatar_id) {
                controller.avatar.write(None, &mut self.outbox);
            }
        }

        info!(entity_id = %avatar_id, controller = %controller_id, "Avatar destroyed");
        self.schedule_despawn(avatar_id, self.settings.avatar_despawn_delay, now);
    }
}

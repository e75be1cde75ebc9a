//! Cooling-driven feed scaling.
//!
//! Layers that print too fast do not get time to solidify. A moving average
//! of recent layer times decides a slow-down factor applied to every
//! scalable move, floored at the minimum feed rate. Layer 0 additionally
//! runs at the first-layer multiplier.

use strata_core::Config;
use strata_geom::line::distance;
use strata_geom::point;

use crate::LayerPlan;

/// Estimated duration of a plan at its current feed rates.
pub fn plan_time(plan: &LayerPlan) -> f64 {
    let mut t = 0.0;
    let mut prev = point(0.0, 0.0);
    for mv in &plan.moves {
        let p = point(mv.x, mv.y);
        if mv.feed > 0.0 {
            t += distance(prev, p) / mv.feed;
        }
        prev = p;
    }
    t
}

fn apply_factor(plan: &mut LayerPlan, factor: f64, min_feed: f64) {
    for mv in &mut plan.moves {
        if mv.scalable {
            mv.feed = (mv.feed * factor).max(min_feed);
        }
    }
}

/// Apply first-layer and minimum-layer-time scaling in place.
pub fn scale_for_cooling(plans: &mut [LayerPlan], cfg: &Config) {
    for plan in plans.iter_mut().filter(|p| p.index == 0) {
        if cfg.s.first_layer_mult > 0.0 && (cfg.s.first_layer_mult - 1.0).abs() > 1e-12 {
            apply_factor(plan, cfg.s.first_layer_mult, cfg.s.min_feed_rate);
        }
    }

    let samples = cfg.s.layer_time_samples.max(1);
    let mut window: Vec<f64> = Vec::with_capacity(samples);
    for plan in plans.iter_mut() {
        let t = plan_time(plan);
        window.push(t);
        if window.len() > samples {
            window.remove(0);
        }
        let avg = window.iter().sum::<f64>() / window.len() as f64;
        if avg < cfg.s.min_layer_time && avg > 0.0 {
            let factor = avg / cfg.s.min_layer_time;
            apply_factor(plan, factor, cfg.s.min_feed_rate);
        }
        plan.layer_time = plan_time(plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Settings;

    use crate::GMove;

    fn quick_plan(index: usize, track_mm: f64, feed: f64) -> LayerPlan {
        LayerPlan {
            index,
            moves: vec![GMove {
                x: track_mm,
                y: 0.0,
                z: 0.2,
                e: 1.0,
                feed,
                scalable: true,
                is_travel: false,
                is_restart: false,
            }],
            layer_time: track_mm / feed,
        }
    }

    fn cfg() -> Config {
        Config::new(Settings::default()).unwrap()
    }

    #[test]
    fn fast_layers_are_slowed_by_the_average_ratio() {
        let cfg = cfg();
        // 50 mm at 50 mm/s = 1 s, far below the 8 s minimum.
        let mut plans: Vec<LayerPlan> = (0..6).map(|i| quick_plan(i, 50.0, 50.0)).collect();
        let expected_factor: f64 = 1.0 / cfg.s.min_layer_time;
        scale_for_cooling(&mut plans, &cfg);
        // Layer 3 onward the window is saturated with 1 s layers.
        let feed = plans[4].moves[0].feed;
        let want = (50.0 * expected_factor).max(cfg.s.min_feed_rate);
        assert!((feed - want).abs() < 1e-6, "feed {} want {}", feed, want);
        // Slowing down lengthens the layer.
        assert!(plans[4].layer_time > 1.0);
    }

    #[test]
    fn slow_layers_are_untouched() {
        let cfg = cfg();
        // 1000 mm at 50 mm/s = 20 s.
        let mut plans: Vec<LayerPlan> = (1..4).map(|i| quick_plan(i, 1000.0, 50.0)).collect();
        scale_for_cooling(&mut plans, &cfg);
        // No layer-0 plan in this list, so no first-layer scaling either.
        assert!((plans[1].moves[0].feed - 50.0).abs() < 1e-9);
    }

    #[test]
    fn min_feed_rate_is_the_floor() {
        let mut settings = Settings::default();
        settings.min_layer_time = 1000.0;
        let cfg = Config::new(settings).unwrap();
        let mut plans: Vec<LayerPlan> = (0..3).map(|i| quick_plan(i, 10.0, 50.0)).collect();
        scale_for_cooling(&mut plans, &cfg);
        assert!(plans[2].moves[0].feed >= cfg.s.min_feed_rate - 1e-9);
    }

    #[test]
    fn first_layer_runs_at_the_multiplier() {
        let mut settings = Settings::default();
        settings.min_layer_time = 0.0;
        let cfg = Config::new(settings).unwrap();
        let mut plans = vec![quick_plan(0, 100.0, 50.0), quick_plan(1, 100.0, 50.0)];
        scale_for_cooling(&mut plans, &cfg);
        assert!((plans[0].moves[0].feed - 25.0).abs() < 1e-9);
        assert!((plans[1].moves[0].feed - 50.0).abs() < 1e-9);
    }

    #[test]
    fn travel_moves_are_never_scaled() {
        let cfg = cfg();
        let mut plan = quick_plan(0, 50.0, 50.0);
        plan.moves.push(GMove {
            x: 0.0,
            y: 0.0,
            z: 0.2,
            e: 0.0,
            feed: 120.0,
            scalable: false,
            is_travel: true,
            is_restart: false,
        });
        let mut plans = vec![plan];
        scale_for_cooling(&mut plans, &cfg);
        assert!((plans[0].moves[1].feed - 120.0).abs() < 1e-9);
    }
}

//! Incremental quaternion orientation filter
//!
//! Gyro rates are integrated into a unit quaternion; the accelerometer pulls
//! the estimate toward measured gravity with a fixed proportional gain. Euler
//! angles are derived from the quaternion on every read and never stored.

/// Below this magnitude (in g) the accelerometer is treated as missing
const MIN_ACCEL_NORM: f64 = 1e-9;

/// Rotation quaternion (w, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Hamilton product `self ⊗ rhs`
    pub fn mul(&self, rhs: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Scale to unit length; a degenerate quaternion resets to identity
    fn normalized(self) -> Quaternion {
        let norm = self.norm();
        if !norm.is_finite() || norm < f64::EPSILON {
            return Quaternion::IDENTITY;
        }
        Quaternion {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// Gravity direction in the body frame implied by this orientation
    fn gravity(&self) -> [f64; 3] {
        let Quaternion { w, x, y, z } = *self;
        [
            2.0 * (x * z - w * y),
            2.0 * (w * x + y * z),
            w * w - x * x - y * y + z * z,
        ]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Roll, pitch and yaw in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Per-channel orientation estimator
///
/// Gain and sample rate are fixed at construction. One instance per sensor;
/// nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    q: Quaternion,
    gain: f64,
    sample_rate_hz: f64,
    dt: f64,
}

impl OrientationFilter {
    /// Create a filter starting at the identity orientation
    ///
    /// `gain` must be finite and non-negative and `sample_rate_hz` positive;
    /// both are checked when the pipeline configuration is validated.
    pub fn new(gain: f64, sample_rate_hz: f64) -> Self {
        Self {
            q: Quaternion::IDENTITY,
            gain,
            sample_rate_hz,
            dt: 1.0 / sample_rate_hz,
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn quaternion(&self) -> Quaternion {
        self.q
    }

    /// Advance the estimate by one sample period
    ///
    /// # Arguments
    /// * `gyro` - angular rate in rad/s
    /// * `accel` - acceleration in g (any scale works, it is normalized)
    pub fn update(&mut self, gyro: [f64; 3], accel: [f64; 3]) {
        let mut rate = gyro;

        let [ax, ay, az] = accel;
        let accel_norm = (ax * ax + ay * ay + az * az).sqrt();

        // Zero or non-finite accelerometer: pure rate integration this step
        if accel_norm.is_finite() && accel_norm > MIN_ACCEL_NORM {
            let a = [ax / accel_norm, ay / accel_norm, az / accel_norm];
            let v = self.q.gravity();

            // Error between measured and estimated gravity: a × v
            let error = [
                a[1] * v[2] - a[2] * v[1],
                a[2] * v[0] - a[0] * v[2],
                a[0] * v[1] - a[1] * v[0],
            ];

            for (r, e) in rate.iter_mut().zip(error) {
                *r += self.gain * e;
            }
        }

        // q += 0.5 * q ⊗ (0, ω) * dt
        let omega = Quaternion { w: 0.0, x: rate[0], y: rate[1], z: rate[2] };
        let q_dot = self.q.mul(&omega);
        let half_dt = 0.5 * self.dt;

        self.q = Quaternion {
            w: self.q.w + q_dot.w * half_dt,
            x: self.q.x + q_dot.x * half_dt,
            y: self.q.y + q_dot.y * half_dt,
            z: self.q.z + q_dot.z * half_dt,
        }
        .normalized();
    }

    /// Rotation about X in degrees
    pub fn roll(&self) -> f64 {
        let Quaternion { w, x, y, z } = self.q;
        (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y)).to_degrees()
    }

    /// Rotation about Y in degrees, clamped at ±90°
    pub fn pitch(&self) -> f64 {
        let Quaternion { w, x, y, z } = self.q;
        (2.0 * (w * y - x * z)).clamp(-1.0, 1.0).asin().to_degrees()
    }

    /// Rotation about Z in degrees
    pub fn yaw(&self) -> f64 {
        let Quaternion { w, x, y, z } = self.q;
        (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z)).to_degrees()
    }

    pub fn euler(&self) -> EulerAngles {
        EulerAngles {
            roll: self.roll(),
            pitch: self.pitch(),
            yaw: self.yaw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: [f64; 3] = [0.0, 0.0, 1.0];

    fn assert_unit(filter: &OrientationFilter) {
        let norm = filter.quaternion().norm();
        assert!((norm - 1.0).abs() < 1e-6, "norm drifted to {}", norm);
    }

    #[test]
    fn test_starts_level() {
        let filter = OrientationFilter::new(1.0, 100.0);
        assert_eq!(filter.quaternion(), Quaternion::IDENTITY);
        assert_eq!(filter.euler(), EulerAngles::default());
    }

    #[test]
    fn test_steady_state_level_stays_at_zero() {
        let mut filter = OrientationFilter::new(1.0, 100.0);
        for _ in 0..1000 {
            filter.update([0.0; 3], LEVEL);
            assert!(filter.roll().abs() < 1e-9);
            assert!(filter.pitch().abs() < 1e-9);
        }
    }

    #[test]
    fn test_norm_stays_unit_under_rotation() {
        let mut filter = OrientationFilter::new(0.5, 100.0);
        for i in 0..2000 {
            let t = i as f64 * 0.01;
            let gyro = [3.0 * t.sin(), -2.0 * (0.7 * t).cos(), 1.5];
            let accel = [0.3 * t.cos(), 0.2, 0.9];
            filter.update(gyro, accel);
            assert_unit(&filter);
        }
    }

    #[test]
    fn test_zero_accel_integrates_gyro_only() {
        let mut filter = OrientationFilter::new(1.0, 100.0);
        let rate = 90f64.to_radians(); // 90°/s about Z

        for _ in 0..50 {
            filter.update([0.0, 0.0, rate], [0.0; 3]);
            assert_unit(&filter);
            assert!(filter.yaw().is_finite());
        }

        // Half a second at 90°/s
        assert!((filter.yaw() - 45.0).abs() < 0.5, "yaw = {}", filter.yaw());
        assert!(filter.roll().abs() < 1e-9);
    }

    #[test]
    fn test_repeated_zero_input_never_nan() {
        let mut filter = OrientationFilter::new(1.0, 100.0);
        for _ in 0..10_000 {
            filter.update([0.0; 3], [0.0; 3]);
        }
        assert_unit(&filter);
        assert_eq!(filter.euler(), EulerAngles::default());
    }

    #[test]
    fn test_converges_to_measured_roll() {
        let mut filter = OrientationFilter::new(1.0, 100.0);
        let roll = 30f64.to_radians();
        let accel = [0.0, roll.sin(), roll.cos()];

        for _ in 0..3000 {
            filter.update([0.0; 3], accel);
        }
        assert!((filter.roll() - 30.0).abs() < 0.1, "roll = {}", filter.roll());
        assert!(filter.pitch().abs() < 0.1);
    }

    #[test]
    fn test_converges_to_measured_pitch() {
        let mut filter = OrientationFilter::new(1.0, 100.0);
        let pitch = 20f64.to_radians();
        let accel = [-pitch.sin(), 0.0, pitch.cos()];

        for _ in 0..3000 {
            filter.update([0.0; 3], accel);
        }
        assert!((filter.pitch() - 20.0).abs() < 0.1, "pitch = {}", filter.pitch());
        assert!(filter.roll().abs() < 0.1);
    }

    #[test]
    fn test_zero_gain_ignores_accel() {
        let mut filter = OrientationFilter::new(0.0, 100.0);
        for _ in 0..500 {
            filter.update([0.0; 3], [0.0, 1.0, 0.0]);
        }
        assert_eq!(filter.euler(), EulerAngles::default());
    }

    #[test]
    fn test_instances_are_independent() {
        let mut a = OrientationFilter::new(1.0, 100.0);
        let b = OrientationFilter::new(1.0, 100.0);
        a.update([1.0, 0.0, 0.0], LEVEL);
        assert!(a.roll() > 0.0);
        assert_eq!(b.quaternion(), Quaternion::IDENTITY);
    }

    #[test]
    fn test_hamilton_product() {
        let i = Quaternion { w: 0.0, x: 1.0, y: 0.0, z: 0.0 };
        let j = Quaternion { w: 0.0, x: 0.0, y: 1.0, z: 0.0 };
        let k = Quaternion { w: 0.0, x: 0.0, y: 0.0, z: 1.0 };
        assert_eq!(i.mul(&j), k);
        assert_eq!(Quaternion::IDENTITY.mul(&i), i);
    }
}

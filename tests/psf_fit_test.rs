//! Integration tests: fit PSF models to synthetic star images with Gaussian
//! read noise and compare the recovered parameters with the truth.

use astrometry::{fit_psf, Point, PsfFitConfig, PsfFitStatus, PsfFunction};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const SIZE: usize = 33;

struct Truth {
    b: f64,
    a: f64,
    x0: f64,
    y0: f64,
    sx: f64,
    sy: f64,
    theta: f64,
    beta: f64,
}

impl Truth {
    fn elliptical_moffat() -> Self {
        Self {
            b: 10.0,
            a: 1000.0,
            x0: 16.0,
            y0: 16.0,
            sx: 2.0,
            sy: 1.5,
            theta: 30.0,
            beta: 3.0,
        }
    }

    /// Elliptical Moffat profile above the background.
    fn signal(&self, x: f64, y: f64) -> f64 {
        let (st, ct) = self.theta.to_radians().sin_cos();
        let (dx, dy) = (x - self.x0, y - self.y0);
        let a = ct * ct / (self.sx * self.sx) + st * st / (self.sy * self.sy);
        let b = st * ct / (self.sy * self.sy) - st * ct / (self.sx * self.sx);
        let c = st * st / (self.sx * self.sx) + ct * ct / (self.sy * self.sy);
        let u = a * dx * dx + 2.0 * b * dx * dy + c * dy * dy;
        self.a * (1.0 + u).powf(-self.beta)
    }

    fn render(&self, noise_sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, noise_sigma).unwrap();
        (0..SIZE * SIZE)
            .map(|k| {
                let (x, y) = ((k % SIZE) as f64, (k / SIZE) as f64);
                self.b + self.signal(x, y) + noise.sample(&mut rng)
            })
            .collect()
    }
}

#[test]
fn test_elliptical_moffat_round_trip() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let truth = Truth::elliptical_moffat();

    // ── Step 1: Render ──
    let patch = truth.render(1.0, 17);
    let noise_free_flux: f64 = (0..SIZE * SIZE)
        .map(|k| truth.signal((k % SIZE) as f64, (k / SIZE) as f64))
        .sum();
    println!("Noise-free flux: {noise_free_flux:.2}");

    // ── Step 2: Fit ──
    // The patch is cut from a larger image at this position.
    let origin = Point::new(1000.0, 2000.0);
    let config = PsfFitConfig {
        function: PsfFunction::Moffat,
        circular: false,
        ..PsfFitConfig::default()
    };
    let psf = fit_psf(&patch, SIZE, SIZE, origin, origin + Point::new(16.0, 16.0), &config);
    println!(
        "Fit: status={:?} B={:.3} A={:.2} c0=({:.4}, {:.4}) sx={:.4} sy={:.4} theta={:.2} beta={:.4} flux={:.2} mad={:.2e}",
        psf.status, psf.b, psf.a, psf.c0.x, psf.c0.y, psf.sx, psf.sy, psf.theta, psf.beta, psf.flux, psf.mad
    );

    // ── Step 3: Compare ──
    assert_eq!(psf.status, PsfFitStatus::FittedOk);
    assert!(psf.is_valid());
    assert!((psf.b - truth.b).abs() < 0.2);
    assert!((psf.a - truth.a).abs() / truth.a < 0.02);
    assert!((psf.c0.x - origin.x - truth.x0).abs() < 0.05);
    assert!((psf.c0.y - origin.y - truth.y0).abs() < 0.05);
    assert!((psf.sx - truth.sx).abs() / truth.sx < 0.03);
    assert!((psf.sy - truth.sy).abs() / truth.sy < 0.03);
    assert!((psf.theta - truth.theta).abs() < 2.0);
    assert!((psf.beta - truth.beta).abs() / truth.beta < 0.1);
    let flux_error = (psf.flux - noise_free_flux).abs() / noise_free_flux;
    println!("Flux error: {:.3}%", flux_error * 100.0);
    assert!(flux_error < 0.02);
}

#[test]
fn test_fixed_beta_and_gaussian_models() {
    let truth = Truth {
        beta: 4.0,
        theta: 0.0,
        sy: 2.0,
        ..Truth::elliptical_moffat()
    };
    let patch = truth.render(1.0, 23);

    // The matching fixed-β model recovers the truth.
    let config = PsfFitConfig {
        function: PsfFunction::Moffat4,
        circular: true,
        ..PsfFitConfig::default()
    };
    let moffat = fit_psf(&patch, SIZE, SIZE, Point::default(), Point::new(15.5, 16.5), &config);
    assert_eq!(moffat.status, PsfFitStatus::FittedOk);
    assert_eq!(moffat.beta, 4.0);
    assert_eq!(moffat.sx, moffat.sy);
    assert!((moffat.sx - 2.0).abs() < 0.06);
    assert!(moffat.c0.distance_to(Point::new(16.0, 16.0)) < 0.05);

    // A Gaussian fits worse than the matching model.
    let config = PsfFitConfig {
        function: PsfFunction::Gaussian,
        circular: true,
        ..PsfFitConfig::default()
    };
    let gaussian = fit_psf(&patch, SIZE, SIZE, Point::default(), Point::new(16.0, 16.0), &config);
    assert!(matches!(
        gaussian.status,
        PsfFitStatus::FittedOk | PsfFitStatus::InaccurateSolution
    ));
    assert!(gaussian.mad > moffat.mad);
    assert!(moffat.ok().is_ok());
}

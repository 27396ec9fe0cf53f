use std::f64::consts::PI;

pub struct Grid {
    pub nz: usize,     // Number of vertical levels
    pub nn: usize,     // Number of horizontal Fourier modes (incl. mode 0)
    pub aspect: usize, // Aspect ratio a = width / height
    pub nx: usize,     // Number of horizontal points, nz * aspect
    pub dz: f64,       // Vertical spacing
    pub dx: f64,       // Horizontal spacing
    pub oodz2: f64,    // 1 / dz^2, second-difference coefficient
}

impl Grid {
    pub fn new(nz: usize, nn: usize, aspect: usize) -> Self {
        // Derived constants, fixed for the whole run
        let nx = nz * aspect;
        let dz = 1.0 / (nz - 1) as f64;
        let dx = aspect as f64 / (nx - 1) as f64;
        let oodz2 = 1.0 / (dz * dz);

        Grid {
            nz,
            nn,
            aspect,
            nx,
            dz,
            dx,
            oodz2,
        }
    }

    pub fn wavenumber(&self, n: usize) -> f64 {
        // Horizontal wavenumber of sine mode n
        n as f64 * PI / self.aspect as f64
    }

    pub fn z_coord(&self, k: usize) -> f64 {
        self.dz * (k as f64)
    }

    pub fn x_coord(&self, i: usize) -> f64 {
        self.dx * (i as f64)
    }
}

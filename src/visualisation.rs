use crate::grid::Grid;
use ndarray::Array2;
use plotters::prelude::*;
use std::f64::consts::PI;

/// Reconstruct a spectral (mode x level) field on the physical nx x nz grid:
/// f(x, z) = f_0(z) + sum_n f_n(z) sin(n pi x / a).
pub fn to_physical(spectral: &Array2<f64>, grid: &Grid) -> Array2<f64> {
    let a = grid.aspect as f64;
    let mut physical = Array2::<f64>::zeros((grid.nx, grid.nz));

    for i in 0..grid.nx {
        let x = grid.x_coord(i);
        for k in 0..grid.nz {
            let mut value = spectral[[0, k]];
            for n in 1..grid.nn {
                value += spectral[[n, k]] * (n as f64 * PI * x / a).sin();
            }
            physical[[i, k]] = value;
        }
    }
    physical
}

pub struct FieldVisualiser {
    output_dir: String,
    width: u32,
    height: u32,
    // Store as a boxed trait object
    gradient: Box<dyn colorgrad::Gradient>,
}

impl FieldVisualiser {
    pub fn new(output_dir: &str, width: u32, height: u32) -> std::io::Result<Self> {
        std::fs::create_dir_all(output_dir)?;

        let gradient = Box::new(colorgrad::preset::rd_yl_bu());

        Ok(Self {
            output_dir: output_dir.to_string(),
            width,
            height,
            gradient,
        })
    }

    pub fn plot_field(
        &self,
        data: &Array2<f64>,
        frame: usize,
        field_name: &str,
        time: f64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let filename = format!("{}/{}_{:06}.png", self.output_dir, field_name, frame);
        let root = BitMapBackend::new(&filename, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let (nx, nz) = data.dim();
        let max_abs = data.iter().map(|&v| v.abs()).fold(0.0_f64, f64::max);
        let min_val = -max_abs;
        let max_val = max_abs;

        let title = format!("{} at t={:.4} (frame {})", field_name, time, frame);
        let mut chart = ChartBuilder::on(&root)
            .caption(&title, ("sans-serif", 30))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(40)
            .build_cartesian_2d(0..nx, 0..nz)?;

        chart
            .configure_mesh()
            .x_desc("X (grid points)")
            .y_desc("Z (grid points)")
            .draw()?;

        for i in 0..nx {
            for k in 0..nz {
                let value = data[[i, k]];
                let color = self.value_to_color(value, min_val, max_val);
                chart.draw_series(std::iter::once(Rectangle::new(
                    [(i, k), (i + 1, k + 1)],
                    color.filled(),
                )))?;
            }
        }

        root.present()?;
        println!("Saved frame: {}", filename);
        Ok(())
    }

    fn value_to_color(&self, value: f64, min_val: f64, max_val: f64) -> RGBColor {
        let normalized = if max_val > min_val {
            (value - min_val) / (max_val - min_val)
        } else {
            0.5
        };
        let normalized = normalized.clamp(0.0, 1.0);
        let color_rgba = self.gradient.at(normalized as f32).to_rgba8();
        RGBColor(color_rgba[0], color_rgba[1], color_rgba[2])
    }
}

use crate::grid::Grid;
use anyhow::{Context, Result};
use ndarray::Array2;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Identifies one of the two derivative buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Two full (mode x level) buffers for one time-derivative quantity.
///
/// The active slot is written during the current step; the other slot holds
/// the previous step's derivative for the multistep update. `advance` flips
/// the roles once per completed step.
pub struct DerivativeHistory {
    slots: [Array2<f64>; 2],
    active: Slot,
}

impl DerivativeHistory {
    pub fn new(nn: usize, nz: usize) -> Self {
        DerivativeHistory {
            slots: [Array2::zeros((nn, nz)), Array2::zeros((nn, nz))],
            active: Slot::A,
        }
    }

    pub fn current(&self) -> &Array2<f64> {
        &self.slots[self.active.index()]
    }

    pub fn current_mut(&mut self) -> &mut Array2<f64> {
        &mut self.slots[self.active.index()]
    }

    pub fn previous(&self) -> &Array2<f64> {
        &self.slots[self.active.other().index()]
    }

    pub fn previous_mut(&mut self) -> &mut Array2<f64> {
        &mut self.slots[self.active.other().index()]
    }

    pub fn advance(&mut self) {
        self.active = self.active.other();
    }

    pub fn zero(&mut self) {
        self.slots[0].fill(0.0);
        self.slots[1].fill(0.0);
    }
}

/// The prognostic fields, (mode x level), in mixed sine-mode/physical space.
///
/// Row 0 is the horizontally averaged profile; rows n >= 1 are sine-series
/// coefficients with wavenumber n*pi/a. The solute field is present only for
/// double-diffusive runs.
pub struct Variables {
    pub tmp: Array2<f64>,
    pub omg: Array2<f64>,
    pub psi: Array2<f64>,
    pub xi: Option<Array2<f64>>,
}

impl Variables {
    pub fn new(grid: &Grid, double_diffusive: bool) -> Self {
        let shape = (grid.nn, grid.nz);
        Variables {
            tmp: Array2::zeros(shape),
            omg: Array2::zeros(shape),
            psi: Array2::zeros(shape),
            xi: double_diffusive.then(|| Array2::zeros(shape)),
        }
    }

    pub fn zero(&mut self) {
        self.tmp.fill(0.0);
        self.omg.fill(0.0);
        self.psi.fill(0.0);
        if let Some(xi) = self.xi.as_mut() {
            xi.fill(0.0);
        }
    }

    /// Largest entry of a field and its (mode, level) location.
    pub fn max_of(field: &Array2<f64>) -> (f64, usize, usize) {
        let mut max = field[[0, 0]];
        let mut loc = (0, 0);
        for ((n, k), &v) in field.indexed_iter() {
            if v > max {
                max = v;
                loc = (n, k);
            }
        }
        (max, loc.0, loc.1)
    }
}

/// Time-derivative histories for every prognostic field.
///
/// All histories flip together so readers always see a fully written
/// previous slot.
pub struct History {
    pub dtmpdt: DerivativeHistory,
    pub domgdt: DerivativeHistory,
    pub dxidt: Option<DerivativeHistory>,
}

/// Mutable references to the slot being written this step.
pub struct CurrentDerivs<'a> {
    pub dtmpdt: &'a mut Array2<f64>,
    pub domgdt: &'a mut Array2<f64>,
    pub dxidt: Option<&'a mut Array2<f64>>,
}

impl History {
    pub fn new(grid: &Grid, double_diffusive: bool) -> Self {
        History {
            dtmpdt: DerivativeHistory::new(grid.nn, grid.nz),
            domgdt: DerivativeHistory::new(grid.nn, grid.nz),
            dxidt: double_diffusive.then(|| DerivativeHistory::new(grid.nn, grid.nz)),
        }
    }

    pub fn current_mut_set(&mut self) -> CurrentDerivs<'_> {
        CurrentDerivs {
            dtmpdt: self.dtmpdt.current_mut(),
            domgdt: self.domgdt.current_mut(),
            dxidt: self.dxidt.as_mut().map(|h| h.current_mut()),
        }
    }

    pub fn advance(&mut self) {
        self.dtmpdt.advance();
        self.domgdt.advance();
        if let Some(h) = self.dxidt.as_mut() {
            h.advance();
        }
    }

    pub fn zero(&mut self) {
        self.dtmpdt.zero();
        self.domgdt.zero();
        if let Some(h) = self.dxidt.as_mut() {
            h.zero();
        }
    }
}

fn write_block(file: &mut File, field: &Array2<f64>) -> Result<()> {
    let values = field
        .as_slice()
        .context("field buffer is not contiguous")?;
    file.write_all(bytemuck::cast_slice(values))?;
    Ok(())
}

fn read_block(file: &mut File, field: &mut Array2<f64>) -> Result<()> {
    let (nn, nz) = field.dim();
    let mut values = vec![0.0f64; nn * nz];
    file.read_exact(bytemuck::cast_slice_mut(&mut values))?;
    *field = Array2::from_shape_vec((nn, nz), values)?;
    Ok(())
}

/// Write the full state as headerless raw doubles in fixed order:
/// tmp, omg, psi, then current/previous slots of each derivative history,
/// with the solute blocks appended for double-diffusive runs.
pub fn write_snapshot(path: &Path, vars: &Variables, history: &History) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("couldn't open {} for writing", path.display()))?;
    write_block(&mut file, &vars.tmp)?;
    write_block(&mut file, &vars.omg)?;
    write_block(&mut file, &vars.psi)?;
    write_block(&mut file, history.dtmpdt.current())?;
    write_block(&mut file, history.dtmpdt.previous())?;
    write_block(&mut file, history.domgdt.current())?;
    write_block(&mut file, history.domgdt.previous())?;
    if let (Some(xi), Some(dxidt)) = (vars.xi.as_ref(), history.dxidt.as_ref()) {
        write_block(&mut file, xi)?;
        write_block(&mut file, dxidt.current())?;
        write_block(&mut file, dxidt.previous())?;
    }
    Ok(())
}

/// Strict full-length read of a snapshot written by `write_snapshot`.
pub fn read_snapshot(path: &Path, vars: &mut Variables, history: &mut History) -> Result<()> {
    let mut file = File::open(path)
        .with_context(|| format!("couldn't open {} for reading", path.display()))?;
    read_block(&mut file, &mut vars.tmp)?;
    read_block(&mut file, &mut vars.omg)?;
    read_block(&mut file, &mut vars.psi)?;
    read_block(&mut file, history.dtmpdt.current_mut())?;
    read_block(&mut file, history.dtmpdt.previous_mut())?;
    read_block(&mut file, history.domgdt.current_mut())?;
    read_block(&mut file, history.domgdt.previous_mut())?;
    if let (Some(xi), Some(dxidt)) = (vars.xi.as_mut(), history.dxidt.as_mut()) {
        read_block(&mut file, xi)?;
        read_block(&mut file, dxidt.current_mut())?;
        read_block(&mut file, dxidt.previous_mut())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    #[test]
    fn slot_roles_flip_on_advance() {
        let mut hist = DerivativeHistory::new(3, 5);
        hist.current_mut()[[1, 2]] = 7.0;
        assert_eq!(hist.previous()[[1, 2]], 0.0);

        hist.advance();
        // Yesterday's write is now the previous slot
        assert_eq!(hist.previous()[[1, 2]], 7.0);
        assert_eq!(hist.current()[[1, 2]], 0.0);

        hist.advance();
        assert_eq!(hist.current()[[1, 2]], 7.0);
    }

    #[test]
    fn histories_advance_together() {
        let grid = Grid::new(5, 3, 1);
        let mut history = History::new(&grid, true);
        history.current_mut_set().dtmpdt[[0, 1]] = 1.0;
        history.current_mut_set().dxidt.as_mut().unwrap()[[0, 1]] = 2.0;
        history.advance();
        assert_eq!(history.dtmpdt.previous()[[0, 1]], 1.0);
        assert_eq!(history.dxidt.as_ref().unwrap().previous()[[0, 1]], 2.0);
    }

    fn fill_distinct(vars: &mut Variables, history: &mut History) {
        let mut v = 0.0;
        for field in [&mut vars.tmp, &mut vars.omg, &mut vars.psi] {
            for x in field.iter_mut() {
                *x = v;
                v += 0.5;
            }
        }
        if let Some(xi) = vars.xi.as_mut() {
            for x in xi.iter_mut() {
                *x = v;
                v += 0.5;
            }
        }
        for hist in [&mut history.dtmpdt, &mut history.domgdt]
            .into_iter()
            .chain(history.dxidt.as_mut())
        {
            for x in hist.current_mut().iter_mut() {
                *x = v;
                v += 0.25;
            }
            for x in hist.previous_mut().iter_mut() {
                *x = v;
                v += 0.25;
            }
        }
    }

    #[test]
    fn snapshot_round_trip_is_bit_exact() {
        let grid = Grid::new(7, 4, 2);
        let mut vars = Variables::new(&grid, false);
        let mut history = History::new(&grid, false);
        fill_distinct(&mut vars, &mut history);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars0.dat");
        write_snapshot(&path, &vars, &history).unwrap();

        let mut vars2 = Variables::new(&grid, false);
        let mut history2 = History::new(&grid, false);
        read_snapshot(&path, &mut vars2, &mut history2).unwrap();

        assert_eq!(vars.tmp, vars2.tmp);
        assert_eq!(vars.omg, vars2.omg);
        assert_eq!(vars.psi, vars2.psi);
        assert_eq!(history.dtmpdt.current(), history2.dtmpdt.current());
        assert_eq!(history.dtmpdt.previous(), history2.dtmpdt.previous());
        assert_eq!(history.domgdt.current(), history2.domgdt.current());
        assert_eq!(history.domgdt.previous(), history2.domgdt.previous());
    }

    #[test]
    fn snapshot_round_trip_double_diffusive() {
        let grid = Grid::new(6, 3, 1);
        let mut vars = Variables::new(&grid, true);
        let mut history = History::new(&grid, true);
        fill_distinct(&mut vars, &mut history);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars0.dat");
        write_snapshot(&path, &vars, &history).unwrap();

        let mut vars2 = Variables::new(&grid, true);
        let mut history2 = History::new(&grid, true);
        read_snapshot(&path, &mut vars2, &mut history2).unwrap();

        assert_eq!(vars.xi.as_ref().unwrap(), vars2.xi.as_ref().unwrap());
        let dxidt = history.dxidt.as_ref().unwrap();
        let dxidt2 = history2.dxidt.as_ref().unwrap();
        assert_eq!(dxidt.current(), dxidt2.current());
        assert_eq!(dxidt.previous(), dxidt2.previous());
    }

    #[test]
    fn short_snapshot_is_an_error() {
        let grid = Grid::new(6, 3, 1);
        let vars = Variables::new(&grid, false);
        let history = History::new(&grid, false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars0.dat");
        write_snapshot(&path, &vars, &history).unwrap();

        // A larger grid must refuse the truncated file
        let big = Grid::new(12, 6, 1);
        let mut vars2 = Variables::new(&big, false);
        let mut history2 = History::new(&big, false);
        assert!(read_snapshot(&path, &mut vars2, &mut history2).is_err());
    }

    #[test]
    fn max_of_reports_location() {
        let grid = Grid::new(5, 3, 1);
        let mut vars = Variables::new(&grid, false);
        vars.tmp[[2, 3]] = 4.5;
        let (max, n, k) = Variables::max_of(&vars.tmp);
        assert_eq!(max, 4.5);
        assert_eq!((n, k), (2, 3));
    }
}

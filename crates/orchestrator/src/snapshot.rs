//! Snapshot input/output.
//!
//! Two formats:
//!
//! - **Column** text: a header line `time ndim N`, then one particle per row
//!   with columns `r[0..d) v[0..d) m h rho u`.
//! - **Binary** `SRN1`: big-endian fixed header (magic `"SRN1"`, ndim: u8,
//!   version: u8, time: f64, N: u64), followed by struct-of-arrays blocks
//!   per field (r, v, m, h, rho, u, flags). Positions and velocities
//!   round-trip bit exactly.
//!
//! Writes and reads are retried once before surfacing `IOFailure`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use kernel::particle::{ParticleStore, ParticleType, SphParticle};
use kernel::SimError;

/// Binary format magic bytes.
pub const MAGIC: &[u8; 4] = b"SRN1";
/// Binary format version.
pub const VERSION: u8 = 1;

/// Particle state held by a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Simulation time.
    pub time: f64,
    /// Spatial dimensionality.
    pub ndim: usize,
    /// Positions.
    pub r: Vec<[f64; 3]>,
    /// Velocities.
    pub v: Vec<[f64; 3]>,
    /// Masses.
    pub m: Vec<f64>,
    /// Smoothing lengths.
    pub h: Vec<f64>,
    /// Densities.
    pub rho: Vec<f64>,
    /// Internal energies.
    pub u: Vec<f64>,
    /// Species flags.
    pub flags: Vec<u8>,
}

impl Snapshot {
    /// Capture the real particles of a store.
    pub fn from_store(store: &ParticleStore, time: f64, ndim: usize) -> Self {
        let mut snap = Snapshot { time, ndim, ..Default::default() };
        for p in store.real() {
            snap.r.push(p.r);
            snap.v.push(p.v);
            snap.m.push(p.m);
            snap.h.push(p.h);
            snap.rho.push(p.rho);
            snap.u.push(p.u);
            snap.flags.push(type_code(p.ptype));
        }
        snap
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    /// True when the snapshot holds no particles.
    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    /// Rebuild a particle store (restart path). Smoothing-derived fields
    /// are refreshed by the first property phase.
    pub fn to_store(&self, capacity: usize) -> ParticleStore {
        let mut store = ParticleStore::new(capacity.max(self.len()));
        for i in 0..self.len() {
            let mut p = SphParticle::new(i);
            p.r = self.r[i];
            p.v = self.v[i];
            p.m = self.m[i];
            p.h = self.h[i];
            p.invh = 1.0 / self.h[i];
            p.rho = self.rho[i];
            p.u = self.u[i];
            p.ptype = type_from_code(self.flags[i]);
            p.active = true;
            store.push(p);
        }
        store
    }
}

fn type_code(ptype: ParticleType) -> u8 {
    match ptype {
        ParticleType::Gas => 0,
        ParticleType::Dust => 1,
        ParticleType::Cdm => 2,
        ParticleType::Dead => 3,
    }
}

fn type_from_code(code: u8) -> ParticleType {
    match code {
        1 => ParticleType::Dust,
        2 => ParticleType::Cdm,
        3 => ParticleType::Dead,
        _ => ParticleType::Gas,
    }
}

/// Run an I/O closure, retrying once before giving up.
fn with_retry<T>(mut op: impl FnMut() -> std::io::Result<T>) -> Result<T, SimError> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            tracing::warn!(error = %first, "snapshot I/O failed, retrying once");
            op().map_err(SimError::Io)
        }
    }
}

/// Write the column text format.
pub fn write_column(snap: &Snapshot, path: &Path) -> Result<(), SimError> {
    with_retry(|| {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{:.16e} {} {}", snap.time, snap.ndim, snap.len())?;
        for i in 0..snap.len() {
            for d in 0..snap.ndim {
                write!(out, "{:.16e} ", snap.r[i][d])?;
            }
            for d in 0..snap.ndim {
                write!(out, "{:.16e} ", snap.v[i][d])?;
            }
            writeln!(
                out,
                "{:.16e} {:.16e} {:.16e} {:.16e}",
                snap.m[i], snap.h[i], snap.rho[i], snap.u[i]
            )?;
        }
        out.flush()
    })
}

/// Read the column text format.
pub fn read_column(path: &Path) -> Result<Snapshot, SimError> {
    with_retry(|| {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header = lines
            .next()
            .ok_or_else(|| bad_data("empty snapshot file"))??;
        let mut fields = header.split_whitespace();
        let time: f64 = parse(fields.next())?;
        let ndim: usize = parse(fields.next())?;
        let n: usize = parse(fields.next())?;
        if !(1..=3).contains(&ndim) {
            return Err(bad_data("snapshot header: invalid ndim"));
        }

        let mut snap = Snapshot { time, ndim, ..Default::default() };
        for line in lines.take(n) {
            let line = line?;
            let mut cols = line.split_whitespace();
            let mut r = [0.0; 3];
            for rd in r.iter_mut().take(ndim) {
                *rd = parse(cols.next())?;
            }
            let mut v = [0.0; 3];
            for vd in v.iter_mut().take(ndim) {
                *vd = parse(cols.next())?;
            }
            snap.r.push(r);
            snap.v.push(v);
            snap.m.push(parse(cols.next())?);
            snap.h.push(parse(cols.next())?);
            snap.rho.push(parse(cols.next())?);
            snap.u.push(parse(cols.next())?);
            snap.flags.push(0);
        }
        if snap.len() != n {
            return Err(bad_data("snapshot truncated"));
        }
        Ok(snap)
    })
}

fn bad_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn parse<T: std::str::FromStr>(field: Option<&str>) -> std::io::Result<T> {
    field
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad_data("malformed snapshot column"))
}

/// Write the binary `SRN1` format.
pub fn write_binary(snap: &Snapshot, path: &Path) -> Result<(), SimError> {
    with_retry(|| {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        out.write_all(&[snap.ndim as u8, VERSION])?;
        out.write_all(&snap.time.to_be_bytes())?;
        out.write_all(&(snap.len() as u64).to_be_bytes())?;

        // Struct-of-arrays blocks, one field at a time.
        for p in &snap.r {
            for d in 0..snap.ndim {
                out.write_all(&p[d].to_be_bytes())?;
            }
        }
        for p in &snap.v {
            for d in 0..snap.ndim {
                out.write_all(&p[d].to_be_bytes())?;
            }
        }
        for block in [&snap.m, &snap.h, &snap.rho, &snap.u] {
            for x in block.iter() {
                out.write_all(&x.to_be_bytes())?;
            }
        }
        out.write_all(&snap.flags)?;
        out.flush()
    })
}

/// Read the binary `SRN1` format.
pub fn read_binary(path: &Path) -> Result<Snapshot, SimError> {
    with_retry(|| {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(bad_data("bad snapshot magic"));
        }
        let mut head = [0u8; 2];
        input.read_exact(&mut head)?;
        let ndim = head[0] as usize;
        if head[1] != VERSION {
            return Err(bad_data("unsupported snapshot version"));
        }
        if !(1..=3).contains(&ndim) {
            return Err(bad_data("snapshot header: invalid ndim"));
        }
        let time = read_f64(&mut input)?;
        let mut nbuf = [0u8; 8];
        input.read_exact(&mut nbuf)?;
        let n = u64::from_be_bytes(nbuf) as usize;

        let mut snap = Snapshot { time, ndim, ..Default::default() };
        for _ in 0..n {
            let mut r = [0.0; 3];
            for rd in r.iter_mut().take(ndim) {
                *rd = read_f64(&mut input)?;
            }
            snap.r.push(r);
        }
        for _ in 0..n {
            let mut v = [0.0; 3];
            for vd in v.iter_mut().take(ndim) {
                *vd = read_f64(&mut input)?;
            }
            snap.v.push(v);
        }
        for block in [&mut snap.m, &mut snap.h, &mut snap.rho, &mut snap.u] {
            for _ in 0..n {
                block.push(read_f64(&mut input)?);
            }
        }
        snap.flags.resize(n, 0);
        input.read_exact(&mut snap.flags)?;
        Ok(snap)
    })
}

fn read_f64(input: &mut impl Read) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("siren-snap-{}-{name}", std::process::id()))
    }

    fn sample_snapshot() -> Snapshot {
        let mut snap = Snapshot { time: 0.625, ndim: 3, ..Default::default() };
        for i in 0..17 {
            let x = 0.1 * i as f64 + 0.037;
            snap.r.push([x, x * x, -x / 3.0]);
            snap.v.push([1.0 / (i as f64 + 1.0), -x, 0.5 * x]);
            snap.m.push(1e-3);
            snap.h.push(0.04 + 1e-4 * i as f64);
            snap.rho.push(1.0 + 0.01 * i as f64);
            snap.u.push(1.5);
            snap.flags.push(if i % 5 == 0 { 2 } else { 0 });
        }
        snap
    }

    #[test]
    fn binary_round_trip_is_bit_exact() {
        let snap = sample_snapshot();
        let path = scratch("bin");
        write_binary(&snap, &path).unwrap();
        let back = read_binary(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.time.to_bits(), snap.time.to_bits());
        assert_eq!(back.ndim, 3);
        assert_eq!(back.len(), snap.len());
        for i in 0..snap.len() {
            for d in 0..3 {
                assert_eq!(back.r[i][d].to_bits(), snap.r[i][d].to_bits());
                assert_eq!(back.v[i][d].to_bits(), snap.v[i][d].to_bits());
            }
            assert_eq!(back.m[i].to_bits(), snap.m[i].to_bits());
            assert_eq!(back.flags[i], snap.flags[i]);
        }
    }

    #[test]
    fn column_round_trip_preserves_values() {
        let snap = sample_snapshot();
        let path = scratch("col");
        write_column(&snap, &path).unwrap();
        let back = read_column(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.len(), snap.len());
        for i in 0..snap.len() {
            for d in 0..3 {
                // %.16e prints enough digits to reconstruct an f64 exactly.
                assert_eq!(back.r[i][d], snap.r[i][d]);
                assert_eq!(back.v[i][d], snap.v[i][d]);
            }
            assert_eq!(back.u[i], snap.u[i]);
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = scratch("magic");
        std::fs::write(&path, b"NOPE----------------").unwrap();
        let err = read_binary(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, SimError::Io(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn store_round_trip_keeps_species() {
        let snap = sample_snapshot();
        let store = snap.to_store(64);
        assert_eq!(store.nhydro, snap.len());
        assert_eq!(store[0].ptype, ParticleType::Cdm);
        assert_eq!(store[1].ptype, ParticleType::Gas);

        let again = Snapshot::from_store(&store, snap.time, snap.ndim);
        assert_eq!(again.flags, snap.flags);
        assert_eq!(again.r[3], snap.r[3]);
    }
}

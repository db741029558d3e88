use byteorder::{ByteOrder, LE};
use globwalk::glob;
use rand::distributions::uniform::{SampleUniform, Uniform};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::fs;
use std::io;
use std::path;

/// Encodes an offset in the sign-magnitude form of bsdiff 4.x.
pub fn encode_offset(x: i64, b: &mut [u8]) {
    if x < 0 {
        LE::write_u64(b, x.wrapping_neg() as u64 | 0x8000000000000000);
    } else {
        LE::write_u64(b, x as u64);
    }
}

/// Builder of uncompressed BSDIFF40 patches.
///
/// Sections are appended in call order. The declared target size defaults to
/// the sum of the add and copy lengths of all controls.
#[derive(Default)]
pub struct PatchBuilder {
    ctrls: Vec<u8>,
    delta: Vec<u8>,
    extra: Vec<u8>,
    tsize: i64,
    forced_tsize: Option<i64>,
}

impl PatchBuilder {
    pub fn new() -> Self {
        PatchBuilder::default()
    }

    /// Append a control block.
    pub fn control(mut self, add: i64, copy: i64, seek: i64) -> Self {
        let mut block = [0; 24];
        encode_offset(add, &mut block[0..8]);
        encode_offset(copy, &mut block[8..16]);
        encode_offset(seek, &mut block[16..24]);
        self.ctrls.extend_from_slice(&block[..]);
        self.tsize += add + copy;
        self
    }

    /// Append raw bytes to the control section.
    pub fn raw_control(mut self, bytes: &[u8]) -> Self {
        self.ctrls.extend_from_slice(bytes);
        self
    }

    /// Append bytes to the diff section.
    pub fn delta(mut self, bytes: &[u8]) -> Self {
        self.delta.extend_from_slice(bytes);
        self
    }

    /// Append bytes to the extra section.
    pub fn extra(mut self, bytes: &[u8]) -> Self {
        self.extra.extend_from_slice(bytes);
        self
    }

    /// Override the declared target size.
    pub fn target_size(mut self, size: i64) -> Self {
        self.forced_tsize = Some(size);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = [0; 32];
        header[..8].copy_from_slice(b"BSDIFF40");
        encode_offset(self.ctrls.len() as i64, &mut header[8..16]);
        encode_offset(self.delta.len() as i64, &mut header[16..24]);
        encode_offset(self.forced_tsize.unwrap_or(self.tsize), &mut header[24..32]);

        let mut patch = Vec::with_capacity(32 + self.ctrls.len() + self.delta.len() + self.extra.len());
        patch.extend_from_slice(&header[..]);
        patch.extend_from_slice(&self.ctrls[..]);
        patch.extend_from_slice(&self.delta[..]);
        patch.extend_from_slice(&self.extra[..]);
        patch
    }
}

/// Make a valid patch from source to target, seeded by the input sizes.
pub fn make_patch(source: &[u8], target: &[u8]) -> Vec<u8> {
    let seed = (source.len() as u64) << 32 | target.len() as u64;
    make_patch_with(source, target, &mut StdRng::seed_from_u64(seed))
}

/// Make a valid patch from source to target.
///
/// This is no delta compressor: source regions are picked at random, partly
/// out of the source bounds, and the target is expressed relative to them.
pub fn make_patch_with<R: Rng>(source: &[u8], target: &[u8], rng: &mut R) -> Vec<u8> {
    let mut builder = PatchBuilder::new();
    let slen = source.len() as i64;

    let mut pos = 0;
    let mut old: i64 = 0;
    while pos < target.len() {
        let remain = target.len() - pos;
        let add = rng.gen_range(0..=Ord::min(remain, 256));
        let mut delta = Vec::with_capacity(add);
        for (i, &t) in target[pos..pos + add].iter().enumerate() {
            let j = old + i as i64;
            if j >= 0 && j < slen {
                delta.push(t.wrapping_sub(source[j as usize]));
            } else {
                delta.push(t);
            }
        }
        pos += add;

        let remain = target.len() - pos;
        let lo = if add == 0 { Ord::min(1, remain) } else { 0 };
        let copy = rng.gen_range(lo..=Ord::min(remain, 32));
        let extra = &target[pos..pos + copy];
        pos += copy;

        let next = rng.gen_range(-8..=slen + 8);
        let seek = next - (old + add as i64);
        old = next;

        builder = builder
            .control(add as i64, copy as i64, seek)
            .delta(&delta[..])
            .extra(extra);
    }

    builder.build()
}

/// On-disk test sample.
pub struct Sample {
    pub name: String,
    pub original: path::PathBuf,
    pub patch: path::PathBuf,
    pub expected: path::PathBuf,
}

impl Sample {
    /// Load sample data as (original, patch, expected).
    pub fn load(&self) -> io::Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let o = fs::read(self.original.as_path())?;
        let p = fs::read(self.patch.as_path())?;
        let e = fs::read(self.expected.as_path())?;
        Ok((o, p, e))
    }
}

/// List samples in `dir`, one sub-directory each holding `original`,
/// `patch` and `expected`.
pub fn get_samples_in<P: AsRef<path::Path>>(dir: P) -> io::Result<Vec<Sample>> {
    let pat = dir.as_ref().join("*").join("patch");
    let walker = match pat.to_str() {
        Some(p) => glob(p).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "cannot convert to str",
            ))
        }
    };

    let mut samples = Vec::new();
    for result in walker.into_iter() {
        let patch = result
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .into_path();
        let d = match patch.parent() {
            Some(d) => d.to_path_buf(),
            None => continue,
        };
        let (original, expected) = (d.join("original"), d.join("expected"));
        if !exists_file(original.as_path()) || !exists_file(expected.as_path()) {
            continue;
        }

        let name = d
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        samples.push(Sample {
            name,
            original,
            patch,
            expected,
        });
    }
    samples.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(samples)
}

/// Description of a random sample.
pub struct RandomSample {
    pub name: &'static str,
    pub source: RandomSource,
    pub targets: Vec<RandomTarget>,
}

/// Description of the source of random sample.
pub enum RandomSource {
    Bytes(&'static [u8]),
    Random(usize),
}

/// Description of a target of the random sample.
pub enum RandomTarget {
    Bytes(&'static [u8]),
    Distort(f64),
}

impl RandomSample {
    /// Generate the source and all targets.
    pub fn generate(&self) -> (Vec<u8>, Vec<Vec<u8>>) {
        let source = match self.source {
            RandomSource::Bytes(bytes) => Vec::from(bytes),
            RandomSource::Random(size) => random_bytes(size),
        };
        let targets = self
            .targets
            .iter()
            .map(|desc| match *desc {
                RandomTarget::Bytes(bytes) => Vec::from(bytes),
                RandomTarget::Distort(similar) => distort(&source[..], similar),
            })
            .collect();
        (source, targets)
    }
}

/// Default random sample descriptions.
pub fn default_random_samples() -> Vec<RandomSample> {
    use RandomSource::{Bytes as SBytes, Random};
    use RandomTarget::{Bytes as TBytes, Distort};

    vec![
        RandomSample {
            name: "empty",
            source: SBytes(b""),
            targets: vec![TBytes(b""), TBytes(b"extra")],
        },
        RandomSample {
            name: "small",
            source: SBytes(
b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempo\
r incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis no\
strud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat."
            ),
            targets: vec![
                TBytes(b""),
                TBytes(b"the quick brown fox jumps over the lazy dog"),
                Distort(0.0),
                Distort(0.5),
                Distort(1.0),
            ],
        },
        RandomSample {
            name: "rand-4k",
            source: Random(4096),
            targets: vec![TBytes(b""), Distort(0.0), Distort(0.5), Distort(1.0)],
        },
        RandomSample {
            name: "rand-256k",
            source: Random(256 * 1024),
            targets: vec![Distort(0.0), Distort(0.5), Distort(1.0)],
        },
    ]
}

/// Random bytes of length `n`.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut bytes = vec![0; n];
    rng.fill_bytes(&mut bytes[..]);
    bytes
}

/// Random target resembling `source`, `similar` in `[0, 1]`.
pub fn distort(source: &[u8], similar: f64) -> Vec<u8> {
    let similar = fraction(similar);
    let rate = convex_mapping(similar);
    if source.is_empty() {
        return random_bytes(random_between(0, 64));
    }

    let tsize = random_between(
        (source.len() as f64 * 0.75) as usize,
        (source.len() as f64 * 1.25) as usize,
    );
    let dmax = Ord::max(16, (source.len() as f64 * 0.33) as usize);
    let emax = (source.len() as f64 * 0.15 * (1.0 - similar)) as usize;

    let mut target = Vec::with_capacity(tsize);
    let mut rng = thread_rng();
    while target.len() < tsize {
        // delta
        let remain = tsize - target.len();
        let dsize = random_between(1, Ord::min(Ord::min(dmax, remain), source.len()));
        let offset = random_between(0, source.len() - dsize);
        for &x in source[offset..offset + dsize].iter() {
            if random_decide(rate) {
                target.push(x);
            } else {
                target.push(rng.gen());
            }
        }

        // extra
        let remain = tsize - target.len();
        if !random_decide(rate) {
            let esize = random_between(0, Ord::min(emax, remain));
            for _ in 0..esize {
                target.push(rng.gen());
            }
        }
    }

    target
}

fn random_decide(rate: f64) -> bool {
    random_between(0.0, 1.0) <= fraction(rate)
}

fn random_between<X: SampleUniform>(lo: X, hi: X) -> X {
    let mut rng = thread_rng();
    Uniform::new_inclusive(lo, hi).sample(&mut rng)
}

fn fraction(x: f64) -> f64 {
    if x.is_nan() || x.is_sign_negative() {
        0.0
    } else if x.is_infinite() || x > 1.0 {
        1.0
    } else {
        x
    }
}

fn convex_mapping(frac: f64) -> f64 {
    (1.0 - (1.0 - frac) * (1.0 - frac)).sqrt()
}

fn exists_file<P: AsRef<path::Path>>(name: P) -> bool {
    if let Ok(meta) = fs::metadata(name) {
        meta.is_file()
    } else {
        false
    }
}

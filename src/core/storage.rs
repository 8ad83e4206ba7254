//! Model images: a versioned, chunked binary encoding of a [`Network`].
//!
//! Layout: `GOOBER01` magic, version (u32 LE), then a sequence of chunks
//! `tag[4] | len u32 | uncompressed_len u32 | lz4 block`. Unknown chunks are
//! skipped so newer writers stay readable.

use std::io::{self, Read, Write};

use crate::hive::Network;
use crate::layer::DenseLayer;
use crate::prng::Prng;
use crate::tensor::Tensor;

pub const MAGIC: &[u8; 8] = b"GOOBER01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_u32_le(w, len_u32(bytes.len())?)?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let n = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

fn len_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length too large"))
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Payload is LZ4-compressed and preceded by its uncompressed length.
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let total_len = 4u32.saturating_add(len_u32(compressed.len())?);

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, len_u32(payload.len())?)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

fn write_f32_slice<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    write_u32_le(w, len_u32(values.len())?)?;
    for &v in values {
        write_f32_le(w, v)?;
    }
    Ok(())
}

fn read_f32_vec<R: Read>(r: &mut R) -> io::Result<Vec<f32>> {
    let n = read_u32_le(r)? as usize;
    let mut out = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        out.push(read_f32_le(r)?);
    }
    Ok(out)
}

fn write_network_payload<W: Write>(net: &Network, w: &mut W) -> io::Result<()> {
    write_string(w, net.name())?;
    write_f32_le(w, net.plasticity)?;
    write_f32_le(w, net.satisfaction)?;
    write_u64_le(w, net.capacity.to_bits())?;
    write_u64_le(w, net.last_expansion_ms())?;
    write_u64_le(w, net.rng_state())?;

    write_u32_le(w, len_u32(net.layers().len())?)?;
    for layer in net.layers() {
        write_u32_le(w, len_u32(layer.in_size())?)?;
        write_u32_le(w, len_u32(layer.out_size())?)?;
        write_f32_slice(w, layer.weights().data())?;
        write_f32_slice(w, layer.bias().data())?;
    }
    Ok(())
}

fn read_network_payload<R: Read>(r: &mut R) -> io::Result<Network> {
    let name = read_string(r)?;
    let plasticity = read_f32_le(r)?;
    let satisfaction = read_f32_le(r)?;
    let capacity = f64::from_bits(read_u64_le(r)?);
    let last_expansion_ms = read_u64_le(r)?;
    let rng_state = read_u64_le(r)?;

    let layer_count = read_u32_le(r)? as usize;
    if layer_count == 0 {
        return Err(invalid("network image has no layers"));
    }
    let mut layers = Vec::with_capacity(layer_count.min(1024));
    for _ in 0..layer_count {
        let in_size = read_u32_le(r)? as usize;
        let out_size = read_u32_le(r)? as usize;
        let weights = Tensor::from_vec(&[in_size, out_size], read_f32_vec(r)?)
            .map_err(|_| invalid("layer weights do not match dims"))?;
        let bias = Tensor::from_vec(&[out_size], read_f32_vec(r)?)
            .map_err(|_| invalid("layer bias does not match dims"))?;
        let layer =
            DenseLayer::from_parts(weights, bias).map_err(|_| invalid("malformed layer"))?;
        layers.push(layer);
    }
    for pair in layers.windows(2) {
        if pair[0].out_size() != pair[1].in_size() {
            return Err(invalid("adjacent layer sizes do not chain"));
        }
    }

    let mut net = Network::from_parts(name, layers, Prng::from_state(rng_state));
    net.plasticity = plasticity;
    net.satisfaction = satisfaction;
    net.capacity = capacity;
    net.set_last_expansion_ms(last_expansion_ms);
    Ok(net)
}

/// Long-term memory and goal, as JSON text.
fn write_memory_payload<W: Write>(net: &Network, w: &mut W) -> io::Result<()> {
    let ltm: Vec<(&str, &serde_json::Value)> = net.memory_entries().collect();
    let ltm = serde_json::to_string(&ltm).map_err(io::Error::other)?;
    let goal = serde_json::to_string(&net.current_goal).map_err(io::Error::other)?;
    write_string(w, &ltm)?;
    write_string(w, &goal)
}

fn read_memory_payload<R: Read>(net: &mut Network, r: &mut R) -> io::Result<()> {
    let ltm: Vec<(String, serde_json::Value)> =
        serde_json::from_str(&read_string(r)?).map_err(io::Error::other)?;
    let goal: Option<serde_json::Value> =
        serde_json::from_str(&read_string(r)?).map_err(io::Error::other)?;
    for (k, v) in ltm {
        net.remember(&k, v);
    }
    net.current_goal = goal;
    Ok(())
}

pub fn write_network<W: Write>(net: &Network, w: &mut W) -> io::Result<()> {
    w.write_all(MAGIC)?;
    write_u32_le(w, VERSION_CURRENT)?;

    let mut payload = Vec::new();
    write_network_payload(net, &mut payload)?;
    write_chunk_lz4(w, *b"NETW", &payload)?;

    let mut payload = Vec::new();
    write_memory_payload(net, &mut payload)?;
    write_chunk_lz4(w, *b"LTM0", &payload)
}

pub fn read_network<R: Read>(r: &mut R) -> io::Result<Network> {
    let magic = read_exact::<8, _>(r)?;
    if &magic != MAGIC {
        return Err(invalid("bad model image magic"));
    }
    let version = read_u32_le(r)?;
    if version != VERSION_CURRENT {
        return Err(invalid("unsupported model image version"));
    }

    let mut net: Option<Network> = None;
    let mut memory: Option<Vec<u8>> = None;

    loop {
        let (tag, len) = match read_chunk_header(r) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };

        let payload = {
            let mut take = (&mut *r).take(len as u64);
            let uncompressed_len = read_u32_le(&mut take)? as usize;
            let mut compressed = Vec::with_capacity((len as usize).saturating_sub(4));
            take.read_to_end(&mut compressed)?;
            decompress_lz4(&compressed, uncompressed_len)?
        };

        match &tag {
            b"NETW" => net = Some(read_network_payload(&mut io::Cursor::new(payload))?),
            b"LTM0" => memory = Some(payload),
            _ => {}
        }
    }

    let mut net = net.ok_or_else(|| invalid("model image is missing the NETW chunk"))?;
    if let Some(memory) = memory {
        read_memory_payload(&mut net, &mut io::Cursor::new(memory))?;
    }
    Ok(net)
}

pub fn network_to_bytes(net: &Network) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_network(net, &mut buf)?;
    Ok(buf)
}

pub fn network_from_bytes(bytes: &[u8]) -> io::Result<Network> {
    read_network(&mut io::Cursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::NetworkConfig;

    fn sample() -> Network {
        let mut net = Network::new("Alpha", &NetworkConfig::default(), Prng::new(42)).unwrap();
        net.expand(1234).unwrap();
        net.plasticity = 0.75;
        net.satisfaction = 0.31;
        net.remember("note", serde_json::json!({"k": [1, 2]}));
        net.current_goal = Some(serde_json::json!("solve"));
        net
    }

    #[test]
    fn roundtrip_preserves_outputs_and_state() {
        let net = sample();
        let bytes = network_to_bytes(&net).unwrap();
        assert_eq!(&bytes[..8], MAGIC);

        let back = network_from_bytes(&bytes).unwrap();
        assert_eq!(back.name(), "Alpha");
        assert_eq!(back.depth(), 3);
        assert_eq!(back.layers(), net.layers());
        assert_eq!(back.plasticity, 0.75);
        assert_eq!(back.satisfaction, 0.31);
        assert_eq!(back.last_expansion_ms(), 1234);
        assert_eq!(back.rng_state(), net.rng_state());
        assert_eq!(back.recall("note"), Some(&serde_json::json!({"k": [1, 2]})));
        assert_eq!(back.current_goal, Some(serde_json::json!("solve")));

        let input = vec![0.25f32; 10];
        assert_eq!(net.forward(&input).unwrap(), back.forward(&input).unwrap());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = network_to_bytes(&sample()).unwrap();
        bytes[0] = b'X';
        let err = network_from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let net = sample();
        let mut bytes = network_to_bytes(&net).unwrap();
        write_chunk_lz4(&mut bytes, *b"ZZZZ", b"future data").unwrap();
        let back = network_from_bytes(&bytes).unwrap();
        assert_eq!(back.layers(), net.layers());
    }

    #[test]
    fn missing_network_chunk_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        write_u32_le(&mut bytes, VERSION_CURRENT).unwrap();
        assert!(network_from_bytes(&bytes).is_err());
    }
}

//! # Bloom Bits
//!
//! Transposes the header blooms of a section into 2048 bit-planes: plane
//! `b` has one bit per header telling whether that header's bloom has bit
//! `b` set. A log filter then only reads the three planes its topic maps
//! to instead of every header.
//!
//! Planes are stored compressed under `B ‖ u16(bit) ‖ u64(section) ‖ head`
//! and are the parent data of the Bloom Trie.

use tracing::debug;

use super::SectionBackend;
use crate::bitutil::compress_bytes;
use crate::config::BLOOM_BIT_LENGTH;
use crate::error::{IndexError, IndexResult};
use crate::storage::{ChainDb, KeyValueStore, WriteBatch};
use crate::types::{Bloom, Hash, Header, ZERO_HASH};

const NAME: &str = "bloombits";

/// Rotates a section of blooms into per-bit bitmaps.
#[derive(Debug, Clone)]
pub struct BloomBitsGenerator {
    /// `BLOOM_BIT_LENGTH` planes of `sections / 8` bytes each.
    planes: Vec<Vec<u8>>,
    sections: u64,
    next: u64,
}

impl BloomBitsGenerator {
    /// A generator for `sections` blooms. Must be a multiple of 8.
    pub fn new(sections: u64) -> IndexResult<Self> {
        if sections == 0 || sections % 8 != 0 {
            return Err(IndexError::SectionGeometry(format!(
                "bloom bits section size {sections} is not a positive multiple of 8"
            )));
        }
        Ok(Self {
            planes: vec![vec![0u8; (sections / 8) as usize]; BLOOM_BIT_LENGTH],
            sections,
            next: 0,
        })
    }

    /// Add the bloom of the header at offset `index` within the section.
    /// Blooms must arrive in order.
    pub fn add_bloom(&mut self, index: u64, bloom: &Bloom) -> IndexResult<()> {
        if index != self.next || index >= self.sections {
            return Err(IndexError::BloomOutOfOrder {
                expected: self.next,
                got: index,
            });
        }
        let byte_index = (index / 8) as usize;
        let bit_mask = 1u8 << (7 - index % 8);
        for (bit, plane) in self.planes.iter_mut().enumerate() {
            if bloom.bit(bit) {
                plane[byte_index] |= bit_mask;
            }
        }
        self.next += 1;
        Ok(())
    }

    /// Bit-plane of `bit`, available once every bloom has been added.
    pub fn bitset(&self, bit: u16) -> IndexResult<&[u8]> {
        if self.next != self.sections {
            return Err(IndexError::IncompleteBloomBits {
                added: self.next,
                size: self.sections,
            });
        }
        self.planes
            .get(bit as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| IndexError::SectionGeometry(format!("bloom bit {bit} out of range")))
    }
}

/// Builds bloom-bits sections into the chain store.
pub struct BloomBitsBackend {
    chain: ChainDb,
    section_size: u64,
    section: u64,
    head: Hash,
    generator: Option<BloomBitsGenerator>,
}

impl BloomBitsBackend {
    pub fn new(chain: ChainDb, section_size: u64) -> Self {
        Self {
            chain,
            section_size,
            section: 0,
            head: ZERO_HASH,
            generator: None,
        }
    }
}

impl SectionBackend for BloomBitsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn reset(&mut self, section: u64, _last_section_head: &Hash) -> IndexResult<()> {
        self.generator = Some(BloomBitsGenerator::new(self.section_size)?);
        self.section = section;
        self.head = ZERO_HASH;
        Ok(())
    }

    fn process(&mut self, header: &Header) -> IndexResult<()> {
        let generator = self.generator.as_mut().ok_or(IndexError::NotReset(NAME))?;
        let offset = header
            .number
            .checked_sub(self.section * self.section_size)
            .ok_or(IndexError::HeaderOutOfSection {
                number: header.number,
                section: self.section,
            })?;
        generator.add_bloom(offset, &header.logs_bloom)?;
        self.head = header.hash();
        Ok(())
    }

    fn commit(&mut self) -> IndexResult<()> {
        let generator = self.generator.take().ok_or(IndexError::NotReset(NAME))?;
        let mut batch = WriteBatch::new();
        let mut stored_bytes = 0;
        for bit in 0..BLOOM_BIT_LENGTH as u16 {
            let compressed = compress_bytes(generator.bitset(bit)?);
            stored_bytes += compressed.len();
            self.chain
                .batch_bloom_bits(&mut batch, bit, self.section, &self.head, compressed);
        }
        self.chain.store().write(batch)?;
        debug!(section = self.section, stored_bytes, "bloom bits committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitutil::decompress_bytes;
    use crate::indexer::test_chain;
    use crate::storage::ChainStore;

    fn bloom_with(bits: &[usize]) -> Bloom {
        let mut bloom = Bloom::zero();
        for bit in bits {
            bloom.set_bit(*bit);
        }
        bloom
    }

    #[test]
    fn size_must_be_byte_aligned() {
        assert!(BloomBitsGenerator::new(12).is_err());
        assert!(BloomBitsGenerator::new(0).is_err());
        assert!(BloomBitsGenerator::new(16).is_ok());
    }

    #[test]
    fn generator_transposes_blooms() {
        let mut gen = BloomBitsGenerator::new(8).unwrap();
        for i in 0..8u64 {
            // Header i sets bit 0, and bit 2047 on even headers.
            let bloom = if i % 2 == 0 {
                bloom_with(&[0, 2047])
            } else {
                bloom_with(&[0])
            };
            gen.add_bloom(i, &bloom).unwrap();
        }
        assert_eq!(gen.bitset(0).unwrap(), &[0xFF]);
        assert_eq!(gen.bitset(2047).unwrap(), &[0b1010_1010]);
        assert_eq!(gen.bitset(1).unwrap(), &[0x00]);
    }

    #[test]
    fn blooms_must_arrive_in_order() {
        let mut gen = BloomBitsGenerator::new(8).unwrap();
        assert!(matches!(
            gen.add_bloom(1, &Bloom::zero()),
            Err(IndexError::BloomOutOfOrder { expected: 0, got: 1 })
        ));
        assert!(matches!(
            gen.bitset(0),
            Err(IndexError::IncompleteBloomBits { added: 0, size: 8 })
        ));
    }

    #[test]
    fn backend_stores_compressed_planes() {
        let (_, chain, headers) = test_chain::build(16, |n| {
            if n == 9 {
                bloom_with(&[42])
            } else {
                Bloom::zero()
            }
        });
        let mut backend = BloomBitsBackend::new(chain.clone(), 8);
        backend.reset(1, &headers[7].hash()).unwrap();
        for header in &headers[8..] {
            backend.process(header).unwrap();
        }
        backend.commit().unwrap();

        let head = headers[15].hash();
        let plane = chain.bloom_bits(42, 1, &head).unwrap().unwrap();
        assert_eq!(decompress_bytes(&plane, 1).unwrap(), vec![0b0100_0000]);
        let empty = chain.bloom_bits(7, 1, &head).unwrap().unwrap();
        assert!(empty.is_empty());
    }
}

const ADDRESS_BITS: u32 = u64::BITS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroAssociativity,
    AddressBitsExceeded {
        set_index_bits: u32,
        block_offset_bits: u32,
    },
    TooLarge {
        set_index_bits: u32,
        lines_per_set: usize,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroAssociativity => {
                f.write_str("associativity (E) must be at least one line per set")
            }
            ConfigError::AddressBitsExceeded {
                set_index_bits,
                block_offset_bits,
            } => f.write_fmt(format_args!(
                "{set_index_bits} set bits + {block_offset_bits} offset bits leave no tag bits in a {ADDRESS_BITS} bit address"
            )),
            ConfigError::TooLarge {
                set_index_bits,
                lines_per_set,
            } => f.write_fmt(format_args!(
                "2^{set_index_bits} sets with {lines_per_set} lines each do not fit in memory"
            )),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Geometry of a set-associative cache.
///
/// An address is split into `| tag | set index | block offset |`, with the
/// offset in the low `b` bits and the set index in the next `s` bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    set_index_bits: u32,
    lines_per_set: usize,
    block_offset_bits: u32,
}

impl CacheConfig {
    pub fn new(
        set_index_bits: u32,
        lines_per_set: usize,
        block_offset_bits: u32,
    ) -> Result<Self, ConfigError> {
        if lines_per_set == 0 {
            return Err(ConfigError::ZeroAssociativity);
        }

        match set_index_bits.checked_add(block_offset_bits) {
            Some(bits) if bits < ADDRESS_BITS => {}
            _ => {
                return Err(ConfigError::AddressBitsExceeded {
                    set_index_bits,
                    block_offset_bits,
                });
            }
        }

        let too_large = ConfigError::TooLarge {
            set_index_bits,
            lines_per_set,
        };
        1usize
            .checked_shl(set_index_bits)
            .and_then(|sets| sets.checked_mul(lines_per_set))
            .ok_or(too_large)?;

        Ok(Self {
            set_index_bits,
            lines_per_set,
            block_offset_bits,
        })
    }

    pub fn set_index_bits(&self) -> u32 {
        self.set_index_bits
    }

    pub fn lines_per_set(&self) -> usize {
        self.lines_per_set
    }

    pub fn block_offset_bits(&self) -> u32 {
        self.block_offset_bits
    }

    pub fn num_sets(&self) -> usize {
        1 << self.set_index_bits
    }

    pub fn num_lines(&self) -> usize {
        self.num_sets() * self.lines_per_set
    }

    pub fn block_size(&self) -> u64 {
        1 << self.block_offset_bits
    }

    pub fn tag_bits(&self) -> u32 {
        ADDRESS_BITS - (self.set_index_bits + self.block_offset_bits)
    }

    pub fn offset(&self, address: u64) -> u64 {
        address & !(!0u64 << self.block_offset_bits)
    }

    pub fn set_index(&self, address: u64) -> usize {
        let set_index_mask = !(!0u64 << self.set_index_bits);
        // the mask keeps the value below num_sets, which fits in usize
        ((address >> self.block_offset_bits) & set_index_mask) as usize
    }

    pub fn tag(&self, address: u64) -> u64 {
        address >> (self.set_index_bits + self.block_offset_bits)
    }

    pub fn decompose(&self, address: u64) -> (usize, u64) {
        (self.set_index(address), self.tag(address))
    }
}

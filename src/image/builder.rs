//! Fluent construction of AArch64 ELF shared objects.
//!
//! [`ElfBuilder`] collects functions, data, imports and relocations and
//! [`ElfBuilder::build`] lays them out in four `PT_LOAD` segments:
//!
//! ```text
//! vaddr 0      R    ELF header, program headers, .dynsym, .dynstr, DT_HASH
//! page aligned R X  code
//! page aligned RW   data, GOT slots, PLT slots, init_array, then .bss
//! page aligned R    relocation tables and .dynamic
//! ```
//!
//! File offsets equal virtual addresses, so the file is the memory image minus
//! the `.bss` tail of the last segment. No section headers are written;
//! defined symbols carry section index 1.
//!
//! Layout is planned before anything is written. Code is assembled against the
//! final data addresses; if the code size changes the data placement, assembly
//! is repeated until both agree.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    assembly::{x, Assembler},
    emulation::{
        loader::{R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT, R_AARCH64_RELATIVE},
        memory::{align_up, PAGE_SIZE},
    },
    image::tables::{
        encode_android_rela, encode_relr, hash_table, hash_table_size, write_dynamic, write_rela,
        write_symbols, RelaEntry, StringTable, SymEntry, DYN_SIZE, RELA_SIZE, SYM_SIZE,
    },
    Result,
};

const EM_AARCH64: u16 = 183;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PHDR_COUNT: usize = 5;

const STB_GLOBAL: u8 = 1;
const STB_WEAK: u8 = 2;
const STT_NOTYPE: u8 = 0;
const STT_FUNC: u8 = 2;
const SECTION_TEXT: u16 = 1;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_PLTRELSZ: u64 = 2;
const DT_HASH: u64 = 4;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_RELA: u64 = 7;
const DT_RELASZ: u64 = 8;
const DT_RELAENT: u64 = 9;
const DT_STRSZ: u64 = 10;
const DT_SYMENT: u64 = 11;
const DT_INIT: u64 = 12;
const DT_SONAME: u64 = 14;
const DT_PLTREL: u64 = 20;
const DT_JMPREL: u64 = 23;
const DT_INIT_ARRAY: u64 = 25;
const DT_INIT_ARRAYSZ: u64 = 27;
const DT_RELRSZ: u64 = 35;
const DT_RELR: u64 = 36;
const DT_RELRENT: u64 = 37;
const DT_ANDROID_RELA: u64 = 0x6000_0011;
const DT_ANDROID_RELASZ: u64 = 0x6000_0012;

/// Upper bound on layout passes before giving up.
const MAX_LAYOUT_PASSES: usize = 8;

/// How `R_AARCH64_RELATIVE` relocations are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelativeEncoding {
    /// Plain `Elf64_Rela` entries in `DT_RELA`.
    #[default]
    Rela,
    /// A `DT_RELR` bitmap table, addends stored at the targets.
    Relr,
    /// The whole `DT_RELA` content packed as APS2 in `DT_ANDROID_RELA`.
    Android,
}

type CodeGenerator = Arc<dyn Fn(&mut Assembler, &ImageLayout) -> Result<()> + Send + Sync>;

#[derive(Clone)]
enum FunctionBody {
    Words(Vec<u32>),
    Generated(CodeGenerator),
}

#[derive(Clone)]
struct FunctionDef {
    name: String,
    body: FunctionBody,
}

/// Addresses known while code is generated.
///
/// All addresses are ELF virtual addresses, i.e. relative to the load base, so
/// code should reach them PC-relatively (`ADR`).
#[derive(Clone, Debug, Default)]
pub struct ImageLayout {
    data: u64,
    got: HashMap<String, u64>,
    plt: HashMap<String, u64>,
}

impl ImageLayout {
    /// Address of byte `offset` of the data blob.
    #[must_use]
    pub fn data(&self, offset: u64) -> u64 {
        self.data + offset
    }

    /// Address of the GOT slot for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no slot was declared with
    /// [`ElfBuilder::got_entry`].
    pub fn got(&self, name: &str) -> Result<u64> {
        self.got
            .get(name)
            .copied()
            .ok_or_else(|| malformed_error!("no GOT slot for {}", name))
    }

    /// Address of the PLT slot for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no slot was declared with
    /// [`ElfBuilder::plt_entry`].
    pub fn plt(&self, name: &str) -> Result<u64> {
        self.plt
            .get(name)
            .copied()
            .ok_or_else(|| malformed_error!("no PLT slot for {}", name))
    }

    /// Emits a call through the PLT slot of `name`, falling back to its GOT
    /// slot. Clobbers `X16`.
    ///
    /// # Errors
    ///
    /// Fails if `name` has neither slot.
    pub fn call(&self, asm: &mut Assembler, name: &str) -> Result<()> {
        let slot = match self.plt.get(name) {
            Some(&slot) => slot,
            None => self.got(name)?,
        };
        asm.adr_to(x(16), slot)?.ldr(x(16), x(16), 0)?.blr(x(16))?;
        Ok(())
    }
}

/// Builder for AArch64 ELF64 shared objects.
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::assembly::x;
/// use droidemu::image::ElfBuilder;
///
/// let bytes = ElfBuilder::new()
///     .soname("libdemo.so")
///     .import("strlen")
///     .got_entry("strlen")
///     .function("length", |asm, layout| {
///         asm.prologue()?;
///         layout.call(asm, "strlen")?;
///         asm.epilogue()?;
///         Ok(())
///     })
///     .build()?;
/// # Ok::<(), droidemu::Error>(())
/// ```
#[derive(Clone)]
pub struct ElfBuilder {
    soname: Option<String>,
    needed: Vec<String>,
    machine: u16,
    executable: bool,
    functions: Vec<FunctionDef>,
    data: Vec<u8>,
    bss: usize,
    imports: Vec<(String, u8)>,
    got: Vec<String>,
    plt: Vec<String>,
    relatives: Vec<(u64, i64)>,
    raw: Vec<(u64, u32, i64)>,
    init: Option<String>,
    init_array: Vec<String>,
    encoding: RelativeEncoding,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self {
            soname: None,
            needed: Vec::new(),
            machine: EM_AARCH64,
            executable: false,
            functions: Vec::new(),
            data: Vec::new(),
            bss: 0,
            imports: Vec::new(),
            got: Vec::new(),
            plt: Vec::new(),
            relatives: Vec::new(),
            raw: Vec::new(),
            init: None,
            init_array: Vec::new(),
            encoding: RelativeEncoding::Rela,
        }
    }
}

impl fmt::Debug for ElfBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfBuilder")
            .field("soname", &self.soname)
            .field("functions", &self.functions.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field("data", &self.data.len())
            .field("bss", &self.bss)
            .field("imports", &self.imports)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl ElfBuilder {
    /// Creates an empty AArch64 `ET_DYN` image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `DT_SONAME`.
    #[must_use]
    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_string());
        self
    }

    /// Adds a `DT_NEEDED` entry.
    #[must_use]
    pub fn needed(mut self, library: &str) -> Self {
        self.needed.push(library.to_string());
        self
    }

    /// Overrides `e_machine`.
    #[must_use]
    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Emits `ET_EXEC` instead of `ET_DYN`.
    #[must_use]
    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    /// Adds an exported function made of raw instruction words.
    #[must_use]
    pub fn code(mut self, name: &str, words: &[u32]) -> Self {
        self.functions.push(FunctionDef {
            name: name.to_string(),
            body: FunctionBody::Words(words.to_vec()),
        });
        self
    }

    /// Adds an exported function generated with the assembler.
    ///
    /// The generator may run more than once while the layout settles, so it
    /// must emit the same code for the same layout.
    #[must_use]
    pub fn function<F>(mut self, name: &str, generate: F) -> Self
    where
        F: Fn(&mut Assembler, &ImageLayout) -> Result<()> + Send + Sync + 'static,
    {
        self.functions.push(FunctionDef {
            name: name.to_string(),
            body: FunctionBody::Generated(Arc::new(generate)),
        });
        self
    }

    /// Appends bytes to the initialized data blob.
    #[must_use]
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Adds zero-initialized bytes after the data segment's file contents.
    #[must_use]
    pub fn bss(mut self, size: usize) -> Self {
        self.bss += size;
        self
    }

    /// Declares a global undefined symbol.
    #[must_use]
    pub fn import(mut self, name: &str) -> Self {
        self.add_import(name, STB_GLOBAL);
        self
    }

    /// Declares a weak undefined symbol.
    #[must_use]
    pub fn weak_import(mut self, name: &str) -> Self {
        self.add_import(name, STB_WEAK);
        self
    }

    /// Reserves a GOT slot bound to `name` with `R_AARCH64_GLOB_DAT`.
    #[must_use]
    pub fn got_entry(mut self, name: &str) -> Self {
        if !self.got.iter().any(|entry| entry == name) {
            self.got.push(name.to_string());
        }
        self
    }

    /// Reserves a PLT slot bound to `name` with `R_AARCH64_JUMP_SLOT`.
    #[must_use]
    pub fn plt_entry(mut self, name: &str) -> Self {
        if !self.plt.iter().any(|entry| entry == name) {
            self.plt.push(name.to_string());
        }
        self
    }

    /// Adds an `R_AARCH64_RELATIVE` at data offset `offset` with image-relative
    /// `addend`.
    #[must_use]
    pub fn relative(mut self, offset: u64, addend: i64) -> Self {
        self.relatives.push((offset, addend));
        self
    }

    /// Selects how relative relocations are encoded.
    #[must_use]
    pub fn relative_encoding(mut self, encoding: RelativeEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Adds a symbol-less `DT_RELA` entry of any type at data offset `offset`.
    #[must_use]
    pub fn raw_relocation(mut self, offset: u64, kind: u32, addend: i64) -> Self {
        self.raw.push((offset, kind, addend));
        self
    }

    /// Sets `DT_INIT` to the function `name`.
    #[must_use]
    pub fn init(mut self, name: &str) -> Self {
        self.init = Some(name.to_string());
        self
    }

    /// Appends functions to `DT_INIT_ARRAY`, in order.
    #[must_use]
    pub fn init_array(mut self, names: &[&str]) -> Self {
        self.init_array.extend(names.iter().map(|name| (*name).to_string()));
        self
    }

    fn add_import(&mut self, name: &str, binding: u8) {
        if !self.imports.iter().any(|(existing, _)| existing == name) {
            self.imports.push((name.to_string(), binding));
        }
    }

    /// Lays out and serializes the image.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] for slots or initializers naming unknown
    ///   symbols, duplicate function names, or unaligned RELR targets
    /// - Assembler errors from function generators
    pub fn build(&self) -> Result<Vec<u8>> {
        let plan = self.plan_symbols()?;
        let header_end = EHDR_SIZE + PHDR_COUNT * PHDR_SIZE;
        let dynsym_at = aligned(header_end as u64, 8)?;
        let dynstr_at = dynsym_at + (plan.symbols.len() * SYM_SIZE) as u64;
        let hash_at = aligned(dynstr_at + plan.strings.len() as u64, 8)?;
        let first_end = hash_at + hash_table_size(plan.symbols.len()) as u64;

        let page = PAGE_SIZE as u64;
        let text_at = aligned(first_end, page)?;
        let (code, labels, data) = self.assemble(text_at)?;

        let function_address = |name: &str| {
            labels
                .get(name)
                .copied()
                .ok_or_else(|| malformed_error!("unknown function {}", name))
        };

        // Data segment contents
        let mut blob = self.data.clone();
        blob.resize((data.init_array - data.start) as usize, 0);
        let mut relocations = Vec::new();
        let mut plt_relocations = Vec::new();
        for name in &self.got {
            relocations.push(RelaEntry {
                offset: data.got[name],
                kind: R_AARCH64_GLOB_DAT,
                symbol: plan.index_of(name)?,
                addend: 0,
            });
        }
        for name in &self.plt {
            plt_relocations.push(RelaEntry {
                offset: data.plt[name],
                kind: R_AARCH64_JUMP_SLOT,
                symbol: plan.index_of(name)?,
                addend: 0,
            });
        }
        let mut relatives = Vec::new();
        for (index, name) in self.init_array.iter().enumerate() {
            let slot = data.init_array + index as u64 * 8;
            relatives.push((slot, function_address(name)? as i64));
        }
        blob.resize(blob.len() + self.init_array.len() * 8, 0);
        for &(offset, addend) in &self.relatives {
            relatives.push((data.start + offset, addend));
        }
        for &(offset, kind, addend) in &self.raw {
            relocations.push(RelaEntry {
                offset: data.start + offset,
                kind,
                symbol: 0,
                addend,
            });
        }

        let mut relr = Vec::new();
        if self.encoding == RelativeEncoding::Relr {
            for &(offset, addend) in &relatives {
                let at = (offset - data.start) as usize;
                if at + 8 > blob.len() {
                    return Err(malformed_error!("RELR target {:#x} lies in .bss", offset));
                }
                blob[at..at + 8].copy_from_slice(&addend.to_le_bytes());
            }
            let offsets: Vec<u64> = relatives.iter().map(|(offset, _)| *offset).collect();
            relr = encode_relr(&offsets)?;
        } else {
            for &(offset, addend) in &relatives {
                relocations.push(RelaEntry {
                    offset,
                    kind: R_AARCH64_RELATIVE,
                    symbol: 0,
                    addend,
                });
            }
        }

        let data_file_end = data.start + blob.len() as u64;
        let data_mem_end = data_file_end + self.bss as u64;
        let meta_at = aligned(data_mem_end.max(data.start), page)?;

        // Relocation segment
        let mut meta = Vec::new();
        let mut dynamic: Vec<(u64, u64)> = Vec::new();
        for &library in &plan.needed {
            dynamic.push((DT_NEEDED, u64::from(library)));
        }
        if let Some(soname) = plan.soname {
            dynamic.push((DT_SONAME, u64::from(soname)));
        }
        dynamic.push((DT_HASH, hash_at));
        dynamic.push((DT_STRTAB, dynstr_at));
        dynamic.push((DT_SYMTAB, dynsym_at));
        dynamic.push((DT_STRSZ, plan.strings.len() as u64));
        dynamic.push((DT_SYMENT, SYM_SIZE as u64));

        if !relocations.is_empty() {
            if self.encoding == RelativeEncoding::Android {
                let packed = encode_android_rela(&relocations, R_AARCH64_RELATIVE);
                dynamic.push((DT_ANDROID_RELA, meta_at + meta.len() as u64));
                dynamic.push((DT_ANDROID_RELASZ, packed.len() as u64));
                meta.extend_from_slice(&packed);
                meta.resize(aligned(meta.len() as u64, 8)? as usize, 0);
            } else {
                dynamic.push((DT_RELA, meta_at + meta.len() as u64));
                dynamic.push((DT_RELASZ, (relocations.len() * RELA_SIZE) as u64));
                dynamic.push((DT_RELAENT, RELA_SIZE as u64));
                write_rela(&mut meta, &relocations);
            }
        }
        if !plt_relocations.is_empty() {
            dynamic.push((DT_JMPREL, meta_at + meta.len() as u64));
            dynamic.push((DT_PLTRELSZ, (plt_relocations.len() * RELA_SIZE) as u64));
            dynamic.push((DT_PLTREL, DT_RELA));
            write_rela(&mut meta, &plt_relocations);
        }
        if !relr.is_empty() {
            dynamic.push((DT_RELR, meta_at + meta.len() as u64));
            dynamic.push((DT_RELRSZ, (relr.len() * 8) as u64));
            dynamic.push((DT_RELRENT, 8));
            for word in &relr {
                meta.extend_from_slice(&word.to_le_bytes());
            }
        }
        if let Some(name) = &self.init {
            dynamic.push((DT_INIT, function_address(name)?));
        }
        if !self.init_array.is_empty() {
            dynamic.push((DT_INIT_ARRAY, data.init_array));
            dynamic.push((DT_INIT_ARRAYSZ, (self.init_array.len() * 8) as u64));
        }
        dynamic.push((DT_NULL, 0));

        let dynamic_at = meta_at + meta.len() as u64;
        write_dynamic(&mut meta, &dynamic);
        let dynamic_size = (dynamic.len() * DYN_SIZE) as u64;

        // Header segment
        let mut symbols = plan.symbols.clone();
        let defined = symbols.iter_mut().skip(1 + self.imports.len());
        for (symbol, function) in defined.zip(&self.functions) {
            symbol.value = function_address(&function.name)?;
        }
        let segments = [
            ProgramHeader::load(0, first_end, first_end, PF_R),
            ProgramHeader::load(text_at, code.len() as u64, code.len() as u64, PF_R | PF_X),
            ProgramHeader::load(
                data.start,
                blob.len() as u64,
                data_mem_end - data.start,
                PF_R | PF_W,
            ),
            ProgramHeader::load(meta_at, meta.len() as u64, meta.len() as u64, PF_R),
            ProgramHeader {
                kind: PT_DYNAMIC,
                flags: PF_R,
                vaddr: dynamic_at,
                file_size: dynamic_size,
                mem_size: dynamic_size,
                align: 8,
            },
        ];

        let mut image = vec![0u8; (meta_at + meta.len() as u64) as usize];
        let mut header = Vec::with_capacity(header_end);
        self.write_ehdr(&mut header);
        for segment in &segments {
            segment.write(&mut header);
        }
        image[..header.len()].copy_from_slice(&header);

        let mut dynsym = Vec::with_capacity(symbols.len() * SYM_SIZE);
        write_symbols(&mut dynsym, &symbols);
        place(&mut image, dynsym_at, &dynsym);
        place(&mut image, dynstr_at, plan.strings.as_bytes());
        let names: Vec<&str> = plan.symbol_names.iter().map(String::as_str).collect();
        place(&mut image, hash_at, &hash_table(&names));
        place(&mut image, text_at, &code);
        place(&mut image, data.start, &blob);
        place(&mut image, meta_at, &meta);

        log::trace!(
            "built image: {} functions, {} imports, {} rela + {} plt relocations, {} relr words, {} bytes",
            self.functions.len(),
            self.imports.len(),
            relocations.len(),
            plt_relocations.len(),
            relr.len(),
            image.len()
        );
        Ok(image)
    }

    fn plan_symbols(&self) -> Result<SymbolPlan> {
        let mut strings = StringTable::new();
        let needed = self.needed.iter().map(|library| strings.add(library)).collect();
        let soname = self.soname.as_deref().map(|name| strings.add(name));

        let mut symbols = vec![SymEntry {
            name: 0,
            info: 0,
            section: 0,
            value: 0,
            size: 0,
        }];
        let mut symbol_names = vec![String::new()];
        for (name, binding) in &self.imports {
            symbols.push(SymEntry {
                name: strings.add(name),
                info: (binding << 4) | STT_NOTYPE,
                section: 0,
                value: 0,
                size: 0,
            });
            symbol_names.push(name.clone());
        }
        for function in &self.functions {
            if symbol_names.contains(&function.name) {
                return Err(malformed_error!("symbol {} defined twice", function.name));
            }
            let size = match &function.body {
                FunctionBody::Words(words) => (words.len() * 4) as u64,
                FunctionBody::Generated(_) => 0,
            };
            symbols.push(SymEntry {
                name: strings.add(&function.name),
                info: (STB_GLOBAL << 4) | STT_FUNC,
                section: SECTION_TEXT,
                value: 0,
                size,
            });
            symbol_names.push(function.name.clone());
        }

        Ok(SymbolPlan {
            strings,
            symbols,
            symbol_names,
            needed,
            soname,
        })
    }

    /// Assembles the code at `text_at` until the data placement it was
    /// generated against matches its own size.
    fn assemble(&self, text_at: u64) -> Result<(Vec<u8>, HashMap<String, u64>, DataLayout)> {
        let page = PAGE_SIZE as u64;
        let mut guess = text_at;
        for _ in 0..MAX_LAYOUT_PASSES {
            let data = self.data_layout(guess)?;
            let layout = ImageLayout {
                data: data.start,
                got: data.got.clone(),
                plt: data.plt.clone(),
            };
            let mut asm = Assembler::new(text_at);
            for function in &self.functions {
                asm.label(&function.name)?;
                match &function.body {
                    FunctionBody::Words(words) => {
                        for word in words {
                            asm.emit(*word);
                        }
                    }
                    FunctionBody::Generated(generate) => generate(&mut asm, &layout)?,
                }
            }
            let (code, labels) = asm.finalize()?;
            let start = aligned(text_at + code.len() as u64, page)?;
            if start == guess {
                return Ok((code, labels, data));
            }
            guess = start;
        }
        Err(malformed_error!(
            "image layout did not settle after {} passes",
            MAX_LAYOUT_PASSES
        ))
    }

    fn data_layout(&self, start: u64) -> Result<DataLayout> {
        let mut cursor = start + self.data.len() as u64;
        if !(self.got.is_empty() && self.plt.is_empty() && self.init_array.is_empty()) {
            cursor = aligned(cursor, 8)?;
        }
        let mut got = HashMap::new();
        for name in &self.got {
            got.insert(name.clone(), cursor);
            cursor += 8;
        }
        let mut plt = HashMap::new();
        for name in &self.plt {
            plt.insert(name.clone(), cursor);
            cursor += 8;
        }
        Ok(DataLayout {
            start,
            got,
            plt,
            init_array: cursor,
        })
    }

    fn write_ehdr(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"\x7FELF");
        out.extend_from_slice(&[2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        let kind = if self.executable { ET_EXEC } else { ET_DYN };
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&self.machine.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_COUNT as u16).to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }
}

struct SymbolPlan {
    strings: StringTable,
    symbols: Vec<SymEntry>,
    symbol_names: Vec<String>,
    needed: Vec<u32>,
    soname: Option<u32>,
}

impl SymbolPlan {
    fn index_of(&self, name: &str) -> Result<u32> {
        self.symbol_names
            .iter()
            .position(|candidate| candidate == name)
            .filter(|&index| index > 0)
            .map(|index| index as u32)
            .ok_or_else(|| malformed_error!("slot for undeclared symbol {}", name))
    }
}

struct DataLayout {
    start: u64,
    got: HashMap<String, u64>,
    plt: HashMap<String, u64>,
    init_array: u64,
}

struct ProgramHeader {
    kind: u32,
    flags: u32,
    vaddr: u64,
    file_size: u64,
    mem_size: u64,
    align: u64,
}

impl ProgramHeader {
    fn load(vaddr: u64, file_size: u64, mem_size: u64, flags: u32) -> Self {
        Self {
            kind: PT_LOAD,
            flags,
            vaddr,
            file_size,
            mem_size,
            align: PAGE_SIZE as u64,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.vaddr.to_le_bytes());
        out.extend_from_slice(&self.vaddr.to_le_bytes());
        out.extend_from_slice(&self.vaddr.to_le_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes());
        out.extend_from_slice(&self.mem_size.to_le_bytes());
        out.extend_from_slice(&self.align.to_le_bytes());
    }
}

fn place(image: &mut [u8], at: u64, bytes: &[u8]) {
    let at = at as usize;
    image[at..at + bytes.len()].copy_from_slice(bytes);
}

fn aligned(value: u64, align: u64) -> Result<u64> {
    align_up(value, align).ok_or_else(|| malformed_error!("image layout overflows at {:#x}", value))
}

#[cfg(test)]
mod tests {
    use goblin::elf::Elf;

    use super::*;

    #[test]
    fn test_empty_image_parses() {
        let bytes = ElfBuilder::new().soname("libempty.so").build().unwrap();
        let elf = Elf::parse(&bytes).unwrap();
        assert_eq!(elf.header.e_machine, EM_AARCH64);
        assert_eq!(elf.header.e_type, ET_DYN);
        assert_eq!(elf.soname, Some("libempty.so"));
        assert_eq!(elf.program_headers.len(), PHDR_COUNT);
    }

    #[test]
    fn test_symbols_and_needed_roundtrip_through_goblin() {
        let bytes = ElfBuilder::new()
            .needed("libc.so")
            .needed("liblog.so")
            .import("strlen")
            .weak_import("__cxa_finalize")
            .code("answer", &[0xD280_0540, 0xD65F_03C0])
            .build()
            .unwrap();
        let elf = Elf::parse(&bytes).unwrap();
        assert_eq!(elf.libraries, vec!["libc.so", "liblog.so"]);

        let names: Vec<&str> = elf
            .dynsyms
            .iter()
            .filter_map(|sym| elf.dynstrtab.get_at(sym.st_name))
            .collect();
        assert!(names.contains(&"strlen"));
        assert!(names.contains(&"__cxa_finalize"));
        assert!(names.contains(&"answer"));

        let answer = elf
            .dynsyms
            .iter()
            .find(|sym| elf.dynstrtab.get_at(sym.st_name) == Some("answer"))
            .unwrap();
        let text = &elf.program_headers[1];
        assert_eq!(answer.st_value, text.p_vaddr);
        assert_eq!(answer.st_size, 8);
        let at = answer.st_value as usize;
        assert_eq!(&bytes[at..at + 4], &0xD280_0540u32.to_le_bytes());
    }

    #[test]
    fn test_generated_code_reaches_got() {
        let bytes = ElfBuilder::new()
            .import("malloc")
            .got_entry("malloc")
            .function("call_malloc", |asm, layout| {
                layout.call(asm, "malloc")?;
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let elf = Elf::parse(&bytes).unwrap();
        assert_eq!(elf.dynrelas.len(), 1);
        let reloc = elf.dynrelas.iter().next().unwrap();
        assert_eq!(reloc.r_type, R_AARCH64_GLOB_DAT);
        assert_eq!(reloc.r_offset, elf.program_headers[2].p_vaddr);
    }

    #[test]
    fn test_plt_entries_use_jmprel() {
        let bytes = ElfBuilder::new()
            .import("free")
            .plt_entry("free")
            .build()
            .unwrap();
        let elf = Elf::parse(&bytes).unwrap();
        assert!(elf.dynrelas.is_empty());
        assert_eq!(elf.pltrelocs.len(), 1);
        assert_eq!(
            elf.pltrelocs.iter().next().unwrap().r_type,
            R_AARCH64_JUMP_SLOT
        );
    }

    #[test]
    fn test_slot_for_undeclared_symbol_fails() {
        assert!(ElfBuilder::new().got_entry("nowhere").build().is_err());
        assert!(ElfBuilder::new().init_array(&["nowhere"]).build().is_err());
    }

    #[test]
    fn test_duplicate_definitions_fail() {
        let result = ElfBuilder::new()
            .code("twice", &[0xD65F_03C0])
            .code("twice", &[0xD65F_03C0])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_large_code_moves_data() {
        let words = vec![0xD503_201Fu32; 2048];
        let bytes = ElfBuilder::new()
            .code("sled", &words)
            .data(&[7u8; 8])
            .build()
            .unwrap();
        let elf = Elf::parse(&bytes).unwrap();
        let text = &elf.program_headers[1];
        let data = &elf.program_headers[2];
        assert!(data.p_vaddr >= text.p_vaddr + text.p_memsz);
        assert_eq!(data.p_vaddr % PAGE_SIZE as u64, 0);
        assert_eq!(bytes[data.p_offset as usize], 7);
    }
}

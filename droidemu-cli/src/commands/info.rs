use std::path::Path;

use droidemu::emulation::{LoadedImage, Resolution, Session};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_session,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    pub start: String,
    pub end: String,
    pub protection: String,
    pub file_size: u64,
    pub mem_size: u64,
}

#[derive(Debug, Serialize)]
pub struct ImportInfo {
    pub name: String,
    pub weak: bool,
    pub resolution: String,
}

#[derive(Debug, Serialize)]
pub struct ExportInfo {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct ImageInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soname: Option<String>,
    pub base: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needed: Vec<String>,
    pub initializers: usize,
    pub relocations: usize,
    pub jni_onload: bool,
    pub segments: Vec<SegmentInfo>,
    pub imports: Vec<ImportInfo>,
    pub exports: Vec<ExportInfo>,
}

fn describe_resolution(resolution: Option<&Resolution>) -> String {
    match resolution {
        Some(Resolution::Image { image, address }) => format!("image #{image} {address:#x}"),
        Some(Resolution::Stub { index, .. }) => format!("host stub #{index}"),
        Some(Resolution::Data { address }) => format!("host data {address:#x}"),
        Some(Resolution::Weak) => "weak (0)".to_string(),
        None => "unresolved".to_string(),
    }
}

fn image_info(session: &Session, image: &LoadedImage) -> anyhow::Result<ImageInfo> {
    let segments = image
        .segments
        .iter()
        .map(|segment| SegmentInfo {
            start: format!("{:#x}", segment.address),
            end: format!("{:#x}", segment.end()),
            protection: segment.protection.to_string(),
            file_size: segment.file_size,
            mem_size: segment.mem_size,
        })
        .collect();

    let imports = image
        .imports
        .iter()
        .map(|import| ImportInfo {
            name: import.name.clone(),
            weak: import.binding == droidemu::emulation::SymbolBinding::Weak,
            resolution: describe_resolution(session.symbols().get(&import.name)),
        })
        .collect();

    let exports = image
        .exports
        .iter()
        .map(|(name, address)| ExportInfo {
            name: name.clone(),
            address: format!("{address:#x}"),
        })
        .collect();

    Ok(ImageInfo {
        name: image.name.clone(),
        soname: image.soname.clone(),
        base: format!("{:#x}", image.base),
        size: image.size,
        needed: image.needed.clone(),
        initializers: image.init_functions(session.memory())?.len(),
        relocations: image.relocations.len(),
        jni_onload: image.exports.contains_key("JNI_OnLoad"),
        segments,
        imports,
        exports,
    })
}

pub fn run(library: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let session = load_session(library)?;
    let image = session
        .primary_image()
        .ok_or_else(|| anyhow::anyhow!("no image loaded from {}", library.display()))?;
    let info = image_info(&session, image)?;

    print_output(&info, opts, |info| {
        println!("Image:           {}", info.name);
        if let Some(soname) = &info.soname {
            println!("SONAME:          {soname}");
        }
        println!("Base:            {}", info.base);
        println!("Size:            {:#x}", info.size);
        if !info.needed.is_empty() {
            println!("Needed:          {}", info.needed.join(", "));
        }
        println!("Initializers:    {}", info.initializers);
        println!("Relocations:     {}", info.relocations);
        let onload = if info.jni_onload { "yes" } else { "no" };
        println!("JNI_OnLoad:      {onload}");

        println!("\nSegments:");
        let mut tw = TabWriter::new(&[
            ("Start", Align::Left),
            ("End", Align::Left),
            ("Prot", Align::Left),
            ("File", Align::Right),
            ("Memory", Align::Right),
        ])
        .indent("  ");
        for segment in &info.segments {
            tw.row(vec![
                segment.start.clone(),
                segment.end.clone(),
                segment.protection.clone(),
                segment.file_size.to_string(),
                segment.mem_size.to_string(),
            ]);
        }
        tw.print();

        if !info.imports.is_empty() {
            println!("\nImports ({} entries):", info.imports.len());
            let mut tw = TabWriter::new(&[("Name", Align::Left), ("Resolved to", Align::Left)])
                .indent("  ");
            for import in &info.imports {
                let name = if import.weak {
                    format!("{} (weak)", import.name)
                } else {
                    import.name.clone()
                };
                tw.row(vec![name, import.resolution.clone()]);
            }
            tw.print();
        }

        if info.exports.is_empty() {
            println!("\nNo exports found.");
        } else {
            println!("\nExports ({} entries):", info.exports.len());
            let mut tw =
                TabWriter::new(&[("Address", Align::Left), ("Name", Align::Left)]).indent("  ");
            for export in &info.exports {
                tw.row(vec![export.address.clone(), export.name.clone()]);
            }
            tw.print();
        }
    })
}

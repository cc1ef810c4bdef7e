use glob::glob;
use proc_macro::TokenStream;
use quote::quote;
use std::env;
use std::path::{Path, PathBuf};
use syn::{LitStr, parse_macro_input};

pub fn template_assets_impl(input: TokenStream) -> TokenStream {
    // 1. glob 模式，相对于 CARGO_MANIFEST_DIR
    let pattern = parse_macro_input!(input as LitStr);
    let pattern_str = pattern.value();

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            return syn::Error::new(pattern.span(), "编译环境异常：未设置 CARGO_MANIFEST_DIR 环境变量")
                .to_compile_error()
                .into();
        }
    };
    let full_pattern = manifest_dir.join(&pattern_str);
    // 模板名相对于模式中第一个通配符之前的目录
    let base = manifest_dir.join(literal_prefix(&pattern_str));

    // 2. 查找匹配的文件
    let mut files: Vec<PathBuf> = match glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("无效的 glob 模式: {}", e))
                .to_compile_error()
                .into();
        }
    };
    files.sort();

    // 3. (模板名, include_str!(路径))
    let assets: Vec<_> = files
        .iter()
        .map(|path| {
            let name = template_name(path, &base);
            let file = path.to_string_lossy().to_string();
            quote! {
                (#name, include_str!(#file))
            }
        })
        .collect();

    let output = quote! {
        ::tagforge::loader::InMemoryLoader::from_assets(&[
            #(#assets),*
        ])
    };
    output.into()
}

/// 模式中不含通配符的前缀目录
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    let components: Vec<&str> = pattern.split('/').collect();
    for (i, part) in components.iter().enumerate() {
        if i + 1 == components.len() || part.contains(['*', '?', '[']) {
            break;
        }
        prefix.push(part);
    }
    prefix
}

fn template_name(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thesisflow::config::{AppConfig, ToolConfig};
use thesisflow::toolchain::{
    Compiler, Converter, ExternalTool, PandocConverter, Severity, ToolError, Toolchain, TypstCompiler,
};

/// `sh -c <script>`; the contract arguments arrive as `$1`, `$2`, ...
fn shell(script: &str) -> ToolConfig {
    ToolConfig {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
    }
}

fn converter(script: &str) -> PandocConverter {
    PandocConverter::new(ExternalTool::new("converter", shell(script)), "markdown", "typst")
}

fn compiler(script: &str) -> TypstCompiler {
    TypstCompiler::new(ExternalTool::new("compiler", shell(script)))
}

mod converter {
    use super::*;

    #[tokio::test]
    async fn passes_markdown_on_stdin_and_writes_the_output_path() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let output = dir.path().join("nested/out.typ");
        let converter = converter(r#"[ "$1" = --from ] && [ "$3" = --to ] && [ "$5" = --output ] && cat > "$6""#);

        tokio_test::assert_ok!(converter.convert("# Title\n\nBody", &output).await);
        assert_eq!(std::fs::read_to_string(&output).expect("Failed to read"), "# Title\n\nBody");
    }

    #[tokio::test]
    async fn non_zero_exit_becomes_a_conversion_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let converter = converter("echo 'Error: unexpected token' >&2; exit 3");

        match converter.convert("text", &dir.path().join("out.typ")).await {
            Err(ToolError::Conversion {
                code,
                stderr,
                diagnostics,
            }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "Error: unexpected token");
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].severity, Severity::Error);
            }
            other => panic!("expected conversion error, got {:?}", other),
        }
    }
}

mod compiler {
    use super::*;

    #[tokio::test]
    async fn invokes_compile_with_input_output_and_root() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let master = dir.path().join("master.typ");
        let output = dir.path().join("thesis.pdf");
        std::fs::write(&master, "= Thesis").expect("Failed to write");
        let compiler = compiler(r#"[ "$1" = compile ] && [ "$4" = --root ] && [ -d "$5" ] && cp "$2" "$3""#);

        tokio_test::assert_ok!(compiler.compile(&master, &output, dir.path()).await);
        assert_eq!(std::fs::read_to_string(&output).expect("Failed to read"), "= Thesis");
    }

    #[tokio::test]
    async fn classifies_stderr_lines_in_order() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let compiler = compiler(r#"printf 'error: unknown font\nwarning: unused label\n  at master.typ:4\n' >&2; exit 1"#);

        let result = compiler
            .compile(&dir.path().join("master.typ"), &dir.path().join("out.pdf"), dir.path())
            .await;
        match result {
            Err(ToolError::Compile { code, diagnostics, .. }) => {
                assert_eq!(code, Some(1));
                let severities: Vec<Severity> = diagnostics.iter().map(|d| d.severity).collect();
                assert_eq!(severities, vec![Severity::Error, Severity::Warning, Severity::Info]);
                assert_eq!(diagnostics[2].message, "  at master.typ:4");
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_terminates_the_running_process() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let compiler = Arc::new(compiler("exec sleep 30"));

        let task = {
            let compiler = Arc::clone(&compiler);
            let root = dir.path().to_path_buf();
            tokio::spawn(async move {
                compiler
                    .compile(&root.join("master.typ"), &root.join("out.pdf"), &root)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        compiler.cancel();
        compiler.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("Compiler was not cancelled")
            .expect("Compile task panicked");
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_without_a_running_process_does_nothing() {
        let compiler = compiler("exit 0");
        compiler.cancel();
        compiler.cancel();
    }

    #[tokio::test]
    async fn missing_executable_is_reported_without_spawning() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let compiler = TypstCompiler::new(ExternalTool::new(
            "compiler",
            ToolConfig::new(dir.path().join("no-such-typst")),
        ));

        assert!(matches!(compiler.ensure_available(), Err(ToolError::MissingExecutable { .. })));
        let result = compiler
            .compile(&dir.path().join("master.typ"), &dir.path().join("out.pdf"), dir.path())
            .await;
        assert!(matches!(result, Err(ToolError::MissingExecutable { .. })));
        assert!(!dir.path().join("out.pdf").exists());
    }
}

mod toolchain {
    use super::*;

    #[test]
    fn lists_the_tools_that_cannot_be_found() {
        let config = AppConfig {
            converter: ToolConfig::new("sh"),
            compiler: ToolConfig::new("/definitely/not/here/typst"),
            ..AppConfig::default()
        };

        let missing = Toolchain::from_config(&config).missing();
        assert_eq!(missing, vec![("compiler", PathBuf::from("/definitely/not/here/typst"))]);
    }
}
